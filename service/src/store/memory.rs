//! Backend de armazenamento em memoria, usado em testes e no modo
//! standalone do servico (sem MongoDB disponivel).

use super::{ApiKeyStore, EmissionStore, StoreError, WebhookStore};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use nfse_core::model::{
    ApiKey, Certificate, EmissionRequest, EmissionResult, EmissionStatus, Rejection, WebhookDelivery,
};
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryStore {
    requests: DashMap<String, EmissionRequest>,
    idempotency_index: DashMap<(String, String), String>,
    webhook_deliveries: DashMap<String, WebhookDelivery>,
    api_keys_by_hash: DashMap<String, ApiKey>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registra uma chave de API no cadastro em memoria, usado pelo modo
    /// standalone do servico (sem MongoDB) e pelos testes de middleware.
    pub fn insert_api_key(&self, key: ApiKey) {
        self.api_keys_by_hash.insert(key.key_hash.clone(), key);
    }
}

#[async_trait]
impl EmissionStore for MemoryStore {
    async fn insert(&self, request: EmissionRequest) -> Result<EmissionRequest, StoreError> {
        let key = (request.api_key_id.clone(), request.idempotency_key.clone());
        if self.idempotency_index.contains_key(&key) {
            return Err(StoreError::DuplicateIdempotencyKey(request.idempotency_key.clone()));
        }
        self.idempotency_index.insert(key, request.request_id.clone());
        self.requests.insert(request.request_id.clone(), request.clone());
        Ok(request)
    }

    async fn get(&self, request_id: &str) -> Result<EmissionRequest, StoreError> {
        self.requests
            .get(request_id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))
    }

    async fn find_by_idempotency_key(
        &self,
        api_key_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<EmissionRequest>, StoreError> {
        let key = (api_key_id.to_string(), idempotency_key.to_string());
        match self.idempotency_index.get(&key) {
            Some(request_id) => Ok(self.requests.get(request_id.as_str()).map(|r| r.clone())),
            None => Ok(None),
        }
    }

    async fn mark_processing(&self, request_id: &str) -> Result<EmissionRequest, StoreError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        if entry.status != EmissionStatus::Pending {
            return Err(StoreError::InvalidTransition(entry.status));
        }
        entry.status = EmissionStatus::Processing;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn mark_success(
        &self,
        request_id: &str,
        result: EmissionResult,
    ) -> Result<EmissionRequest, StoreError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition(entry.status));
        }
        entry.status = EmissionStatus::Success;
        entry.result = Some(result);
        if let Some(cert) = entry.certificate.as_mut() {
            cert.scrub_secret_material();
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn mark_failed(
        &self,
        request_id: &str,
        rejection: Rejection,
    ) -> Result<EmissionRequest, StoreError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition(entry.status));
        }
        entry.status = EmissionStatus::Failed;
        entry.rejection = Some(rejection);
        if let Some(cert) = entry.certificate.as_mut() {
            cert.scrub_secret_material();
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn update_signing_status(
        &self,
        request_id: &str,
        certificate: Certificate,
    ) -> Result<EmissionRequest, StoreError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        entry.certificate = Some(certificate);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn increment_retry(&self, request_id: &str, last_error: String) -> Result<EmissionRequest, StoreError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        entry.retry_count += 1;
        entry.last_error = Some(last_error);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn find_by_access_key(&self, access_key: &str) -> Result<Option<EmissionRequest>, StoreError> {
        Ok(self
            .requests
            .iter()
            .find(|entry| entry.result.as_ref().map(|r| r.access_key.as_str()) == Some(access_key))
            .map(|entry| entry.clone()))
    }

    async fn find_by_dps_id(&self, dps_id: &str) -> Result<Option<EmissionRequest>, StoreError> {
        Ok(self
            .requests
            .iter()
            .find(|entry| entry.dps_id.as_deref() == Some(dps_id))
            .map(|entry| entry.clone()))
    }

    async fn list_by_api_key(
        &self,
        api_key_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<EmissionRequest>, StoreError> {
        let mut matching: Vec<EmissionRequest> = self
            .requests
            .iter()
            .filter(|entry| entry.api_key_id == api_key_id)
            .map(|entry| entry.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let start = (page.saturating_sub(1) * page_size) as usize;
        Ok(matching.into_iter().skip(start).take(page_size as usize).collect())
    }

    async fn find_pending_requests(&self, limit: u64) -> Result<Vec<EmissionRequest>, StoreError> {
        let mut matching: Vec<EmissionRequest> = self
            .requests
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.clone())
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn save_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.webhook_deliveries.insert(delivery.delivery_id.clone(), delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, delivery_id: &str) -> Result<WebhookDelivery, StoreError> {
        self.webhook_deliveries
            .get(delivery_id)
            .map(|d| d.clone())
            .ok_or_else(|| StoreError::NotFound(delivery_id.to_string()))
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.api_keys_by_hash.get(key_hash).map(|k| k.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfse_core::model::{DpsNumbering, Environment, Provider, Service, Values};

    fn sample(request_id: &str, idempotency_key: &str) -> EmissionRequest {
        EmissionRequest {
            request_id: request_id.to_string(),
            api_key_id: "key1".to_string(),
            idempotency_key: idempotency_key.to_string(),
            status: EmissionStatus::Pending,
            environment: Environment::Homologation,
            provider: Provider {
                cnpj: Some("11222333000181".into()),
                cpf: None,
                name: "Prestador".into(),
                municipality_code: "3550308".into(),
            },
            taker: None,
            service: Service {
                national_code: "0107".into(),
                description: "Consultoria".into(),
                municipality_code: "3550308".into(),
            },
            values: Values {
                service_value: 1000.0,
                unconditional_discount: 0.0,
                conditional_discount: 0.0,
                deductions: 0.0,
                iss_rate: 5.0,
            },
            dps: DpsNumbering { series: "1".into(), number: "1".into(), substituted_access_key: None },
            dps_id: None,
            certificate: None,
            webhook_url: None,
            retry_count: 0,
            last_error: None,
            is_presigned: false,
            presigned_xml: None,
            result: None,
            rejection: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insere_e_recupera_pedido() {
        let store = MemoryStore::new();
        store.insert(sample("r1", "idem1")).await.unwrap();
        let found = store.get("r1").await.unwrap();
        assert_eq!(found.request_id, "r1");
    }

    #[tokio::test]
    async fn rejeita_chave_de_idempotencia_duplicada() {
        let store = MemoryStore::new();
        store.insert(sample("r1", "idem1")).await.unwrap();
        let err = store.insert(sample("r2", "idem1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey(_)));
    }

    #[tokio::test]
    async fn transicao_processing_depois_success_zera_certificado() {
        let store = MemoryStore::new();
        let mut request = sample("r1", "idem1");
        request.certificate = Some(Certificate {
            pfx: Some(vec![1, 2, 3]),
            password: Some("senha".into()),
            ..Default::default()
        });
        store.insert(request).await.unwrap();
        store.mark_processing("r1").await.unwrap();
        let result = EmissionResult {
            access_key: "ak".into(),
            nfse_number: "1".into(),
            xml: "<DPS/>".into(),
        };
        let updated = store.mark_success("r1", result).await.unwrap();
        assert!(!updated.certificate.unwrap().has_secret_material());
    }

    #[tokio::test]
    async fn nao_permite_reprocessar_pedido_terminal() {
        let store = MemoryStore::new();
        store.insert(sample("r1", "idem1")).await.unwrap();
        store.mark_processing("r1").await.unwrap();
        let result = EmissionResult {
            access_key: "ak".into(),
            nfse_number: "1".into(),
            xml: "<DPS/>".into(),
        };
        store.mark_success("r1", result.clone()).await.unwrap();
        let err = store.mark_success("r1", result).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(EmissionStatus::Success)));
    }
}
