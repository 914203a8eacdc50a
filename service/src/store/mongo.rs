//! Backend de armazenamento sobre MongoDB (secao 4.I, producao)
//!
//! Cada pedido de emissao e um documento na colecao `emission_requests`,
//! indexado por `request_id` (unico) e pela combinacao
//! `(api_key_id, idempotency_key)` (unico, para a deduplicacao da API).

use super::{ApiKeyStore, EmissionStore, StoreError, WebhookStore};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions};
use mongodb::{Collection, Database, IndexModel};
use nfse_core::model::{
    ApiKey, Certificate, EmissionRequest, EmissionResult, EmissionStatus, Rejection, WebhookDelivery,
};

pub struct MongoStore {
    collection: Collection<EmissionRequest>,
    webhook_deliveries: Collection<WebhookDelivery>,
    api_keys: Collection<ApiKey>,
}

impl MongoStore {
    pub fn new(database: &Database) -> Self {
        Self {
            collection: database.collection("emission_requests"),
            webhook_deliveries: database.collection("webhook_deliveries"),
            api_keys: database.collection("api_keys"),
        }
    }

    /// Cria os indices necessarios. Chamado uma vez na inicializacao do
    /// servico (secao 4.I).
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let request_id_index = IndexModel::builder()
            .keys(doc! { "request_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let idempotency_index = IndexModel::builder()
            .keys(doc! { "api_key_id": 1, "idempotency_key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let access_key_index = IndexModel::builder()
            .keys(doc! { "result.access_key": 1 })
            .options(IndexOptions::builder().sparse(true).build())
            .build();
        let dps_id_index = IndexModel::builder()
            .keys(doc! { "dps_id": 1 })
            .options(IndexOptions::builder().sparse(true).build())
            .build();
        let api_key_listing_index = IndexModel::builder()
            .keys(doc! { "api_key_id": 1, "created_at": -1 })
            .build();
        let status_index = IndexModel::builder().keys(doc! { "status": 1 }).build();
        let status_created_at_index = IndexModel::builder()
            .keys(doc! { "status": 1, "created_at": 1 })
            .build();

        self.collection
            .create_index(request_id_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.collection
            .create_index(idempotency_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.collection
            .create_index(access_key_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.collection
            .create_index(dps_id_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.collection
            .create_index(api_key_listing_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.collection
            .create_index(status_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.collection
            .create_index(status_created_at_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let api_key_hash_index = IndexModel::builder()
            .keys(doc! { "key_hash": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.api_keys
            .create_index(api_key_hash_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let webhook_delivery_index = IndexModel::builder()
            .keys(doc! { "delivery_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.webhook_deliveries
            .create_index(webhook_delivery_index)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn replace(&self, request: &EmissionRequest) -> Result<(), StoreError> {
        self.collection
            .replace_one(doc! { "request_id": &request.request_id }, request)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, request_id: &str) -> Result<EmissionRequest, StoreError> {
        self.collection
            .find_one(doc! { "request_id": request_id })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))
    }
}

#[async_trait]
impl EmissionStore for MongoStore {
    async fn insert(&self, request: EmissionRequest) -> Result<EmissionRequest, StoreError> {
        let existing = self
            .collection
            .find_one(doc! {
                "api_key_id": &request.api_key_id,
                "idempotency_key": &request.idempotency_key,
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if existing.is_some() {
            return Err(StoreError::DuplicateIdempotencyKey(request.idempotency_key.clone()));
        }

        self.collection
            .insert_one(&request)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(request)
    }

    async fn get(&self, request_id: &str) -> Result<EmissionRequest, StoreError> {
        self.fetch(request_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        api_key_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<EmissionRequest>, StoreError> {
        self.collection
            .find_one(doc! { "api_key_id": api_key_id, "idempotency_key": idempotency_key })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn mark_processing(&self, request_id: &str) -> Result<EmissionRequest, StoreError> {
        let mut request = self.fetch(request_id).await?;
        if request.status != EmissionStatus::Pending {
            return Err(StoreError::InvalidTransition(request.status));
        }
        request.status = EmissionStatus::Processing;
        request.updated_at = Utc::now();
        self.replace(&request).await?;
        Ok(request)
    }

    async fn mark_success(
        &self,
        request_id: &str,
        result: EmissionResult,
    ) -> Result<EmissionRequest, StoreError> {
        let mut request = self.fetch(request_id).await?;
        if request.status.is_terminal() {
            return Err(StoreError::InvalidTransition(request.status));
        }
        request.status = EmissionStatus::Success;
        request.result = Some(result);
        if let Some(cert) = request.certificate.as_mut() {
            cert.scrub_secret_material();
        }
        request.updated_at = Utc::now();
        self.replace(&request).await?;
        Ok(request)
    }

    async fn mark_failed(
        &self,
        request_id: &str,
        rejection: Rejection,
    ) -> Result<EmissionRequest, StoreError> {
        let mut request = self.fetch(request_id).await?;
        if request.status.is_terminal() {
            return Err(StoreError::InvalidTransition(request.status));
        }
        request.status = EmissionStatus::Failed;
        request.rejection = Some(rejection);
        if let Some(cert) = request.certificate.as_mut() {
            cert.scrub_secret_material();
        }
        request.updated_at = Utc::now();
        self.replace(&request).await?;
        Ok(request)
    }

    async fn update_signing_status(
        &self,
        request_id: &str,
        certificate: Certificate,
    ) -> Result<EmissionRequest, StoreError> {
        let mut request = self.fetch(request_id).await?;
        request.certificate = Some(certificate);
        request.updated_at = Utc::now();
        self.replace(&request).await?;
        Ok(request)
    }

    async fn increment_retry(&self, request_id: &str, last_error: String) -> Result<EmissionRequest, StoreError> {
        let mut request = self.fetch(request_id).await?;
        request.retry_count += 1;
        request.last_error = Some(last_error);
        request.updated_at = Utc::now();
        self.replace(&request).await?;
        Ok(request)
    }

    async fn find_by_access_key(&self, access_key: &str) -> Result<Option<EmissionRequest>, StoreError> {
        self.collection
            .find_one(doc! { "result.access_key": access_key })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_by_dps_id(&self, dps_id: &str) -> Result<Option<EmissionRequest>, StoreError> {
        self.collection
            .find_one(doc! { "dps_id": dps_id })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn list_by_api_key(
        &self,
        api_key_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<EmissionRequest>, StoreError> {
        let skip = page.saturating_sub(1) * page_size;
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .skip(skip)
            .limit(page_size as i64)
            .build();
        let cursor = self
            .collection
            .find(doc! { "api_key_id": api_key_id })
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_pending_requests(&self, limit: u64) -> Result<Vec<EmissionRequest>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1 })
            .limit(limit as i64)
            .build();
        let cursor = self
            .collection
            .find(doc! { "status": { "$in": ["pending", "processing"] } })
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl WebhookStore for MongoStore {
    async fn save_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.webhook_deliveries
            .replace_one(doc! { "delivery_id": &delivery.delivery_id }, delivery)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_delivery(&self, delivery_id: &str) -> Result<WebhookDelivery, StoreError> {
        self.webhook_deliveries
            .find_one(doc! { "delivery_id": delivery_id })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(delivery_id.to_string()))
    }
}

#[async_trait]
impl ApiKeyStore for MongoStore {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        self.api_keys
            .find_one(doc! { "key_hash": key_hash })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
