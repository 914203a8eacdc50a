//! Processador de emissao (componente K, orquestrador)
//!
//! Worker idempotente para a tarefa `emission:process`, seguindo o
//! algoritmo de 4 passos da secao 4.K: carregar, transicionar para
//! `processing`, construir/assinar o XML, submeter ao SEFIN.

use crate::queue::{Job, JobQueue};
use crate::sefin::{SefinClient, SefinError, SefinOutcome};
use crate::store::{EmissionStore, StoreError, WebhookStore};
use crate::webhook;
use chrono::Utc;
use nfse_core::model::{EmissionRequest, Environment, Rejection};
use nfse_core::xml::{builder, signer};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Resultado de uma tentativa de processamento, usado pelo worker para
/// decidir se o job volta para a fila com backoff.
#[derive(Debug, PartialEq)]
pub enum ProcessOutcome {
    /// O pedido concluiu (sucesso ou rejeicao terminal); a tarefa nao
    /// deve ser reenfileirada.
    Done,
    /// Falha transitoria (SEFIN indisponivel, escrita de transicao
    /// falhou); a tarefa deve ser reenfileirada com backoff.
    Retry,
}

fn rejection(code: &str, message: impl Into<String>) -> Rejection {
    let info = nfse_core::rejection::lookup(code);
    Rejection {
        code: code.to_string(),
        message: message.into(),
        description: info.description,
        action: info.action,
        government_code: None,
        category: info.category,
        retryable: info.retryable,
    }
}

pub struct Processor<S: EmissionStore, C: SefinClient> {
    store: Arc<S>,
    sefin: Arc<C>,
    queue: Arc<dyn JobQueue>,
    webhook_store: Arc<dyn WebhookStore>,
}

impl<S: EmissionStore, C: SefinClient> Processor<S, C> {
    pub fn new(
        store: Arc<S>,
        sefin: Arc<C>,
        queue: Arc<dyn JobQueue>,
        webhook_store: Arc<dyn WebhookStore>,
    ) -> Self {
        Self { store, sefin, queue, webhook_store }
    }

    /// Cria o registro `pending` de entrega de webhook para `request` (se
    /// ele tiver `webhook_url` e estiver em estado terminal) e enfileira
    /// a tarefa `webhook:delivery` correspondente, em vez de notificar
    /// sincronamente a partir do processamento da emissao (secao 4.L).
    async fn dispatch_webhook(&self, request: &EmissionRequest) {
        let delivery_id = Uuid::new_v4().to_string();
        let Some(delivery) = webhook::new_delivery(request, delivery_id) else {
            return;
        };
        if let Err(err) = self.webhook_store.save_delivery(&delivery).await {
            warn!(request_id = %request.request_id, %err, "falha ao registrar entrega de webhook");
            return;
        }
        if let Err(err) = self.queue.enqueue(Job::webhook_delivery(delivery.delivery_id)).await {
            warn!(request_id = %request.request_id, %err, "falha ao enfileirar entrega de webhook");
        }
    }

    /// Executa o pipeline completo para `request_id`. Chamado pelo loop
    /// do worker a cada job retirado da fila.
    pub async fn process(&self, request_id: &str) -> ProcessOutcome {
        let request = match self.store.get(request_id).await {
            Ok(r) => r,
            Err(StoreError::NotFound(_)) => {
                info!(request_id, "pedido nao encontrado, descartando tarefa");
                return ProcessOutcome::Done;
            }
            Err(err) => {
                warn!(request_id, %err, "falha ao carregar pedido");
                return ProcessOutcome::Retry;
            }
        };

        if request.status.is_terminal() {
            return ProcessOutcome::Done;
        }

        if self.store.mark_processing(request_id).await.is_err() {
            return ProcessOutcome::Retry;
        }

        let xml = if request.is_presigned {
            match &request.presigned_xml {
                Some(xml) => xml.clone(),
                None => {
                    self.fail(request_id, rejection("E062", "is_presigned sem presigned_xml")).await;
                    return ProcessOutcome::Done;
                }
            }
        } else {
            let built = match builder::build_dps(&request, Utc::now()) {
                Ok(xml) => xml,
                Err(err) => {
                    self.fail(request_id, rejection("XML_BUILD_ERROR", err.to_string())).await;
                    return ProcessOutcome::Done;
                }
            };

            match &request.certificate {
                Some(cert) if !cert.is_signed => {
                    let pfx = cert.pfx.clone().unwrap_or_default();
                    let password = cert.password.clone().unwrap_or_default();
                    match signer::A1Certificate::parse(&pfx, &password)
                        .and_then(|parsed| parsed.check_validity(Utc::now()).map(|_| parsed))
                    {
                        Ok(parsed) => match signer::sign_dps(&built, &parsed) {
                            Ok(signed) => {
                                let mut updated = cert.clone();
                                updated.is_signed = true;
                                updated.subject = Some(parsed.subject.clone());
                                updated.issuer = Some(parsed.issuer.clone());
                                updated.serial_number = Some(parsed.serial_number.clone());
                                updated.scrub_secret_material();
                                let _ = self.store.update_signing_status(request_id, updated).await;
                                signed
                            }
                            Err(err) => {
                                self.fail(request_id, rejection("CERTIFICATE_ERROR", err.to_string())).await;
                                return ProcessOutcome::Done;
                            }
                        },
                        Err(err) => {
                            self.fail(request_id, rejection("CERTIFICATE_ERROR", err.to_string())).await;
                            return ProcessOutcome::Done;
                        }
                    }
                }
                _ => built,
            }
        };

        let environment = request.environment;
        self.submit(request_id, &xml, environment).await
    }

    async fn submit(&self, request_id: &str, xml: &str, _environment: Environment) -> ProcessOutcome {
        match self.sefin.submit_dps(xml).await {
            Ok(SefinOutcome::Accepted(result)) => {
                let updated = match self.store.mark_success(request_id, result).await {
                    Ok(updated) => updated,
                    Err(_) => return ProcessOutcome::Retry,
                };
                self.dispatch_webhook(&updated).await;
                ProcessOutcome::Done
            }
            Ok(SefinOutcome::Rejected(rejection)) => {
                self.fail(request_id, rejection).await;
                ProcessOutcome::Done
            }
            Err(SefinError::Unavailable(msg)) | Err(SefinError::MalformedResponse(msg)) => {
                let _ = self.store.increment_retry(request_id, msg).await;
                ProcessOutcome::Retry
            }
            Err(SefinError::Timeout) => {
                let _ = self.store.increment_retry(request_id, "timeout".to_string()).await;
                ProcessOutcome::Retry
            }
        }
    }

    async fn fail(&self, request_id: &str, rejection: Rejection) {
        if let Ok(updated) = self.store.mark_failed(request_id, rejection).await {
            self.dispatch_webhook(&updated).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryQueue;
    use crate::sefin::mock::MockSefinClient;
    use crate::store::memory::MemoryStore;
    use nfse_core::model::{
        Certificate, DpsNumbering, EmissionRequest, EmissionStatus, Provider, Service, Values,
    };

    fn new_processor<S: EmissionStore, C: SefinClient>(
        store: Arc<S>,
        sefin: Arc<C>,
        webhook_store: Arc<MemoryStore>,
    ) -> Processor<S, C> {
        Processor::new(store, sefin, Arc::new(MemoryQueue::new()), webhook_store)
    }

    fn sample_request(request_id: &str) -> EmissionRequest {
        EmissionRequest {
            request_id: request_id.to_string(),
            api_key_id: "key1".to_string(),
            idempotency_key: format!("idem-{request_id}"),
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
    async fn processa_pedido_sem_certificado_com_sucesso() {
        let store = MemoryStore::new();
        let sefin = Arc::new(MockSefinClient::new());
        store.insert(sample_request("r1")).await.unwrap();

        let processor = new_processor(store.clone(), sefin, store.clone());
        let outcome = processor.process("r1").await;

        assert_eq!(outcome, ProcessOutcome::Done);
        let updated = store.get("r1").await.unwrap();
        assert_eq!(updated.status, EmissionStatus::Success);
        assert!(updated.result.is_some());
    }

    #[tokio::test]
    async fn pedido_inexistente_nao_e_reenfileirado() {
        let store = MemoryStore::new();
        let sefin = Arc::new(MockSefinClient::new());
        let processor = new_processor(store.clone(), sefin, store);
        assert_eq!(processor.process("nao-existe").await, ProcessOutcome::Done);
    }

    #[tokio::test]
    async fn pedido_ja_terminal_nao_e_reprocessado() {
        let store = MemoryStore::new();
        let sefin = Arc::new(MockSefinClient::new());
        let mut request = sample_request("r1");
        request.status = EmissionStatus::Success;
        request.result = Some(nfse_core::model::EmissionResult {
            access_key: "ak".into(),
            nfse_number: "1".into(),
            xml: "<DPS/>".into(),
        });
        store.insert(request).await.unwrap();

        let processor = new_processor(store.clone(), sefin, store);
        assert_eq!(processor.process("r1").await, ProcessOutcome::Done);
    }

    #[tokio::test]
    async fn certificado_invalido_gera_rejeicao_terminal() {
        let store = MemoryStore::new();
        let sefin = Arc::new(MockSefinClient::new());
        let mut request = sample_request("r1");
        request.certificate = Some(Certificate {
            pfx: Some(vec![0, 1, 2]),
            password: Some("senha".into()),
            is_signed: false,
            ..Default::default()
        });
        store.insert(request).await.unwrap();

        let processor = new_processor(store.clone(), sefin, store.clone());
        let outcome = processor.process("r1").await;

        assert_eq!(outcome, ProcessOutcome::Done);
        let updated = store.get("r1").await.unwrap();
        assert_eq!(updated.status, EmissionStatus::Failed);
        assert!(updated.rejection.is_some());
    }

    #[tokio::test]
    async fn sucesso_com_webhook_url_enfileira_entrega() {
        let store = MemoryStore::new();
        let sefin = Arc::new(MockSefinClient::new());
        let mut request = sample_request("r1");
        request.webhook_url = Some("https://example.test/hook".into());
        store.insert(request).await.unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let processor = Processor::new(store.clone(), sefin, queue.clone(), store.clone());
        assert_eq!(processor.process("r1").await, ProcessOutcome::Done);

        assert_eq!(queue.len().await.unwrap(), 1);
        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.task_type, crate::queue::TASK_WEBHOOK_DELIVERY);
        let delivery_id = job.delivery_id().unwrap();
        let delivery = WebhookStore::get_delivery(store.as_ref(), delivery_id).await.unwrap();
        assert_eq!(delivery.status, nfse_core::model::WebhookDeliveryStatus::Pending);
    }
}
