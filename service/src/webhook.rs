//! Entrega de webhooks (secao 4.L)
//!
//! Cada notificacao e um agregado [`WebhookDelivery`] persistido via
//! [`WebhookStore`]: `build_payload`/`new_delivery` criam o registro
//! (estado `pending`) quando um pedido atinge um estado terminal,
//! `attempt_delivery` executa uma unica tentativa de entrega assinada
//! com HMAC-SHA256 e atualiza o registro (`retrying`/`success`), e
//! `mark_exhausted` fecha o registro como `failed` quando o worker
//! esgota as retentativas da tarefa `webhook:delivery` (secao 4.J).

use crate::store::{StoreError, WebhookStore};
use chrono::Utc;
use hmac::{Hmac, Mac};
use nfse_core::model::{EmissionRequest, EmissionStatus, WebhookDelivery, WebhookDeliveryStatus};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Retry,
}

fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("chave HMAC de tamanho qualquer e aceita");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn status_label(request: &EmissionRequest) -> &'static str {
    match request.status {
        EmissionStatus::Success => "success",
        EmissionStatus::Failed => "failed",
        EmissionStatus::Processing => "processing",
        EmissionStatus::Pending => "pending",
    }
}

/// Nome do evento (`event`) para o payload do webhook, conforme o
/// estado terminal atingido pelo pedido. `None` quando o pedido ainda
/// nao esta em um estado terminal — nao ha evento a notificar.
pub fn event_name(request: &EmissionRequest) -> Option<&'static str> {
    match request.status {
        EmissionStatus::Success => Some("emission.completed"),
        EmissionStatus::Failed => Some("emission.failed"),
        EmissionStatus::Processing | EmissionStatus::Pending => None,
    }
}

/// Monta o corpo JSON notificado ao `webhook_url` do pedido (secao
/// 4.L): `event`/`timestamp` identificam a notificacao em si,
/// independente do conteudo do pedido.
pub fn build_payload(request: &EmissionRequest, event: &str) -> serde_json::Value {
    serde_json::json!({
        "event": event,
        "request_id": request.request_id,
        "status": status_label(request),
        "access_key": request.result.as_ref().map(|r| r.access_key.as_str()),
        "rejection_code": request.rejection.as_ref().map(|r| r.code.as_str()),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Cria o registro `pending` de uma entrega de webhook para `request`,
/// ainda nao persistido. Retorna `None` se o pedido nao tem
/// `webhook_url` configurada ou nao esta em um estado terminal.
pub fn new_delivery(request: &EmissionRequest, delivery_id: String) -> Option<WebhookDelivery> {
    let url = request.webhook_url.clone()?;
    let event = event_name(request)?;
    let now = Utc::now();
    Some(WebhookDelivery {
        delivery_id,
        request_id: request.request_id.clone(),
        api_key_id: request.api_key_id.clone(),
        url,
        payload: build_payload(request, event),
        status: WebhookDeliveryStatus::Pending,
        attempts: 0,
        last_status_code: None,
        last_response: None,
        last_error: None,
        completed_at: None,
        duration_ms: None,
        created_at: now,
        updated_at: now,
    })
}

/// Executa uma unica tentativa de entrega de `delivery`, persistindo o
/// resultado a cada passo: `retrying` antes de enviar, depois
/// `success` ou, em caso de falha transitoria, os campos de
/// diagnostico sem ainda fechar o registro (o worker decide, pelo
/// `max_retry` da tarefa, se ha nova tentativa ou se ela se esgota).
pub async fn attempt_delivery(
    client: &reqwest::Client,
    store: &dyn WebhookStore,
    mut delivery: WebhookDelivery,
    signing_secret: &str,
) -> (WebhookDelivery, DeliveryOutcome) {
    let body = match serde_json::to_vec(&delivery.payload) {
        Ok(b) => b,
        Err(err) => {
            delivery.last_error = Some(err.to_string());
            delivery.updated_at = Utc::now();
            let _ = store.save_delivery(&delivery).await;
            return (delivery, DeliveryOutcome::Retry);
        }
    };
    let signature = sign_body(signing_secret, &body);

    delivery.attempts += 1;
    delivery.status = WebhookDeliveryStatus::Retrying;
    delivery.updated_at = Utc::now();
    let _ = store.save_delivery(&delivery).await;

    let started = std::time::Instant::now();
    let response = client
        .post(&delivery.url)
        .header("Content-Type", "application/json")
        .header("X-Nfse-Signature", &signature)
        .body(body)
        .send()
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;
    delivery.duration_ms = Some(duration_ms);
    delivery.updated_at = Utc::now();

    match response {
        Ok(resp) if resp.status().is_success() => {
            delivery.status = WebhookDeliveryStatus::Success;
            delivery.last_status_code = Some(resp.status().as_u16());
            delivery.last_error = None;
            delivery.completed_at = Some(Utc::now());
            let _ = store.save_delivery(&delivery).await;
            (delivery, DeliveryOutcome::Delivered)
        }
        Ok(resp) => {
            let status_code = resp.status().as_u16();
            let body_text = resp.text().await.unwrap_or_default();
            delivery.last_status_code = Some(status_code);
            delivery.last_response = Some(WebhookDelivery::truncate_response(&body_text));
            let _ = store.save_delivery(&delivery).await;
            (delivery, DeliveryOutcome::Retry)
        }
        Err(err) => {
            delivery.last_error = Some(err.to_string());
            let _ = store.save_delivery(&delivery).await;
            (delivery, DeliveryOutcome::Retry)
        }
    }
}

/// Fecha definitivamente uma entrega como `failed` quando o worker
/// esgota as retentativas da tarefa `webhook:delivery` (secao 4.J).
pub async fn mark_exhausted(store: &dyn WebhookStore, mut delivery: WebhookDelivery) -> Result<(), StoreError> {
    delivery.status = WebhookDeliveryStatus::Failed;
    delivery.completed_at = Some(Utc::now());
    delivery.updated_at = Utc::now();
    store.save_delivery(&delivery).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assinatura_e_deterministica_para_o_mesmo_corpo() {
        let a = sign_body("segredo", b"{\"x\":1}");
        let b = sign_body("segredo", b"{\"x\":1}");
        assert_eq!(a, b);
    }

    #[test]
    fn assinaturas_diferem_com_segredos_diferentes() {
        let a = sign_body("segredo-a", b"{\"x\":1}");
        let b = sign_body("segredo-b", b"{\"x\":1}");
        assert_ne!(a, b);
    }

    #[test]
    fn evento_de_sucesso_e_falha_sao_distintos() {
        assert_eq!(event_name(&sample(EmissionStatus::Success)), Some("emission.completed"));
        assert_eq!(event_name(&sample(EmissionStatus::Failed)), Some("emission.failed"));
        assert_eq!(event_name(&sample(EmissionStatus::Pending)), None);
    }

    fn sample(status: EmissionStatus) -> EmissionRequest {
        use nfse_core::model::{DpsNumbering, Environment, Provider, Service, Values};
        EmissionRequest {
            request_id: "r1".into(),
            api_key_id: "key1".into(),
            idempotency_key: "idem1".into(),
            status,
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
            webhook_url: Some("https://example.test/hook".into()),
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
}
