//! Handlers HTTP (secao 6)

use super::middleware::ApiKeyIdentity;
use super::AppState;
use crate::error::ApiError;
use crate::queue::Job;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use nfse_core::model::{EmissionRequest, EmissionStatus, Environment, Service, Taker, Values};
use nfse_core::validators::{self, EmissionRequestInput};
use nfse_core::xml::presigned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn identity(req: &HttpRequest) -> Result<ApiKeyIdentity, ApiError> {
    req.extensions()
        .get::<ApiKeyIdentity>()
        .cloned()
        .ok_or(ApiError::Unauthorized)
}

#[derive(Deserialize)]
pub struct EmissionRequestBody {
    pub environment: Environment,
    pub provider: nfse_core::model::Provider,
    #[serde(default)]
    pub taker: Option<Taker>,
    pub service: Service,
    pub values: Values,
    pub dps: nfse_core::model::DpsNumbering,
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub idempotency_key: String,
}

#[derive(Serialize)]
pub struct EmissionAccepted {
    pub request_id: String,
    pub status: &'static str,
    pub status_url: String,
}

/// `POST /v1/nfse` — emissao estruturada (secao 6, secao 4.D).
pub async fn create_structured_emission(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<EmissionRequestBody>,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let body = body.into_inner();

    let errors = validators::validate_emission_request(&EmissionRequestInput {
        taker: body.taker.as_ref(),
        service: &body.service,
        values: &body.values,
    });
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    if let Some(existing) = state
        .store
        .find_by_idempotency_key(&caller.api_key_id, &body.idempotency_key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Ok(accepted_response(&existing.request_id));
    }

    let now = Utc::now();
    let mut request = EmissionRequest {
        request_id: Uuid::new_v4().to_string(),
        api_key_id: caller.api_key_id,
        idempotency_key: body.idempotency_key,
        status: EmissionStatus::Pending,
        environment: body.environment,
        provider: body.provider,
        taker: body.taker,
        service: body.service,
        values: body.values,
        dps: body.dps,
        dps_id: None,
        certificate: None,
        webhook_url: body.webhook_url,
        retry_count: 0,
        last_error: None,
        is_presigned: false,
        presigned_xml: None,
        result: None,
        rejection: None,
        created_at: now,
        updated_at: now,
    };

    request.dps_id = Some(
        nfse_core::xml::builder::compute_dps_id(&request)
            .map_err(|e| {
                ApiError::Validation(vec![nfse_core::validators::FieldError {
                    field: "dps".to_string(),
                    code: "INVALID_DPS_IDENTIFIER",
                    message: e.to_string(),
                }])
            })?
            .to_id_string(),
    );

    let inserted = state
        .store
        .insert(request)
        .await
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    state
        .queue
        .enqueue(Job::emission_process(inserted.request_id.clone()))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(accepted_response(&inserted.request_id))
}

#[derive(Deserialize)]
pub struct PresignedEmissionBody {
    pub xml: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Serialize)]
pub struct PresignedAccepted {
    pub request_id: String,
    pub status: &'static str,
    pub status_url: String,
    pub dps_id: String,
    pub provider: String,
}

/// `POST /v1/nfse/xml` — emissao pre-assinada (secao 4.H).
pub async fn create_presigned_emission(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PresignedEmissionBody>,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let extracted = presigned::extract_presigned(&body.xml)
        .map_err(|e| ApiError::Validation(vec![nfse_core::validators::FieldError {
            field: "xml".to_string(),
            code: "INVALID_PRESIGNED_XML",
            message: e.to_string(),
        }]))?;

    if !extracted.has_signature {
        return Err(ApiError::Validation(vec![nfse_core::validators::FieldError {
            field: "xml".to_string(),
            code: "MISSING_SIGNATURE",
            message: "DPS pre-assinada sem elemento Signature".to_string(),
        }]));
    }

    let provider_doc = extracted
        .provider_cnpj
        .clone()
        .or_else(|| extracted.provider_cpf.clone())
        .unwrap_or_default();

    let environment = match extracted.environment_code {
        Some(2) => Environment::Homologation,
        _ => Environment::Production,
    };

    let now = Utc::now();
    let idempotency_key = extracted.dps_id.clone();
    let request = EmissionRequest {
        request_id: Uuid::new_v4().to_string(),
        api_key_id: caller.api_key_id,
        idempotency_key,
        status: EmissionStatus::Pending,
        environment,
        provider: nfse_core::model::Provider {
            cnpj: extracted.provider_cnpj.clone(),
            cpf: extracted.provider_cpf.clone(),
            name: extracted.provider_name.clone().unwrap_or_default(),
            municipality_code: extracted.provider_municipality.clone().unwrap_or_default(),
        },
        taker: None,
        service: nfse_core::model::Service {
            national_code: extracted.national_service_code.clone().unwrap_or_default(),
            description: extracted.service_description.clone().unwrap_or_default(),
            municipality_code: extracted.service_municipality.clone().unwrap_or_default(),
        },
        values: Values {
            service_value: extracted.service_value.unwrap_or(0.0),
            unconditional_discount: 0.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 0.0,
        },
        dps: nfse_core::model::DpsNumbering {
            series: extracted.series.clone().unwrap_or_default(),
            number: extracted.number.clone().unwrap_or_default(),
            substituted_access_key: None,
        },
        dps_id: Some(extracted.dps_id.clone()),
        certificate: None,
        webhook_url: body.webhook_url.clone(),
        retry_count: 0,
        last_error: None,
        is_presigned: true,
        presigned_xml: Some(extracted.xml.clone()),
        result: None,
        rejection: None,
        created_at: now,
        updated_at: now,
    };

    let inserted = state
        .store
        .insert(request)
        .await
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    state
        .queue
        .enqueue(Job::emission_process(inserted.request_id.clone()))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(HttpResponse::Accepted().json(PresignedAccepted {
        status_url: format!("/v1/nfse/status/{}", inserted.request_id),
        request_id: inserted.request_id,
        status: "pending",
        dps_id: extracted.dps_id,
        provider: provider_doc,
    }))
}

fn accepted_response(request_id: &str) -> HttpResponse {
    HttpResponse::Accepted().json(EmissionAccepted {
        request_id: request_id.to_string(),
        status: "pending",
        status_url: format!("/v1/nfse/status/{request_id}"),
    })
}

/// `GET /v1/nfse/status/{requestId}`.
pub async fn get_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let request = state
        .store
        .get(&path.into_inner())
        .await
        .map_err(|_| ApiError::NotFound)?;

    if request.api_key_id != caller.api_key_id {
        return Err(ApiError::Forbidden);
    }

    Ok(HttpResponse::Ok().json(request))
}

/// `GET /health` — usado por orquestradores de container.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// `GET /health/live` — liveness: o processo esta rodando.
pub async fn health_live() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// `GET /health/ready` — readiness: dependencias (store, fila) acessiveis.
pub async fn health_ready(state: web::Data<AppState>) -> HttpResponse {
    match state.queue.len().await {
        Ok(_) => HttpResponse::Ok().finish(),
        Err(_) => HttpResponse::ServiceUnavailable().finish(),
    }
}

#[derive(Deserialize)]
pub struct ListStatusQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

#[derive(Serialize)]
pub struct StatusPage {
    pub page: u64,
    pub page_size: u64,
    pub items: Vec<EmissionRequest>,
}

/// `GET /v1/nfse/status` — lista paginada, mais recentes primeiro,
/// restrita aos pedidos da propria chave de API.
pub async fn list_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListStatusQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);

    let items = state
        .store
        .list_by_api_key(&caller.api_key_id, page, page_size)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(StatusPage { page, page_size, items }))
}

/// `GET /v1/nfse/{chaveAcesso}` — lookup da NFS-e autorizada pela chave
/// de acesso atribuida pelo SEFIN. `403` se o pedido pertence a outra
/// chave de API (secao 7, "forbidden").
pub async fn get_by_access_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let access_key = path.into_inner();

    let request = state
        .store
        .find_by_access_key(&access_key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    if request.api_key_id != caller.api_key_id {
        return Err(ApiError::Forbidden);
    }

    Ok(HttpResponse::Ok().json(request))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default, rename = "tipo")]
    pub event_type: Option<String>,
}

/// `GET /v1/nfse/{chaveAcesso}/eventos?tipo=` — eventos associados a
/// uma NFS-e ja autorizada (secao 9, `SefinClient::query_events`).
pub async fn get_events(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let access_key = path.into_inner();

    let request = state
        .store
        .find_by_access_key(&access_key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    if request.api_key_id != caller.api_key_id {
        return Err(ApiError::Forbidden);
    }

    let events = state
        .sefin
        .query_events(&access_key, query.event_type.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(events))
}

/// Certificado e senha extraidos do formulario multipart de
/// `GET|HEAD /v1/dps/{id}`. O tamanho do PFX e checado conforme os
/// bytes chegam, para nunca reter mais que `max_certificate_bytes` em
/// memoria de um upload malicioso.
struct UploadedCertificate {
    #[allow(dead_code)]
    pfx: Vec<u8>,
    #[allow(dead_code)]
    password: String,
}

async fn read_certificate_multipart(
    mut payload: actix_multipart::Multipart,
    max_bytes: usize,
) -> Result<UploadedCertificate, ApiError> {
    use futures_util::{StreamExt, TryStreamExt};

    let mut pfx: Option<Vec<u8>> = None;
    let mut password: Option<String> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Validation(vec![nfse_core::validators::FieldError {
            field: "multipart".to_string(),
            code: "INVALID_MULTIPART",
            message: e.to_string(),
        }]))?
    {
        let content_disposition = field.content_disposition();
        let name = content_disposition
            .as_ref()
            .and_then(|cd| cd.get_name())
            .unwrap_or("")
            .to_string();
        let mut buf = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::Validation(vec![nfse_core::validators::FieldError {
                field: name.clone(),
                code: "INVALID_MULTIPART_CHUNK",
                message: e.to_string(),
            }]))?;
            buf.extend_from_slice(&chunk);
            if name == "certificate" && buf.len() > max_bytes {
                return Err(ApiError::PayloadTooLarge);
            }
        }

        match name.as_str() {
            "certificate" => pfx = Some(buf),
            "certificate_password" => password = Some(String::from_utf8_lossy(&buf).into_owned()),
            _ => {}
        }
    }

    let pfx = pfx.ok_or_else(|| ApiError::Validation(vec![nfse_core::validators::FieldError {
        field: "certificate".to_string(),
        code: "MISSING_CERTIFICATE",
        message: "campo certificate ausente no formulario multipart".to_string(),
    }]))?;
    let password = password.ok_or_else(|| ApiError::Validation(vec![nfse_core::validators::FieldError {
        field: "certificate_password".to_string(),
        code: "MISSING_CERTIFICATE_PASSWORD",
        message: "campo certificate_password ausente no formulario multipart".to_string(),
    }]))?;

    Ok(UploadedCertificate { pfx, password })
}

/// `GET|HEAD /v1/dps/{id}` — lookup de uma DPS pelo identificador de 42
/// digitos, autenticado por um certificado A1 enviado via multipart
/// (secao 6). O certificado em si nao e usado para assinatura aqui —
/// apenas recebido e validado quanto ao tamanho, ja que a posse do
/// certificado e o fator de autorizacao para a consulta.
pub async fn dps_lookup(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: actix_multipart::Multipart,
) -> Result<HttpResponse, ApiError> {
    let caller = identity(&req)?;
    let dps_id = path.into_inner();

    let _certificate = read_certificate_multipart(payload, state.config.max_certificate_bytes).await?;

    let request = state
        .store
        .find_by_dps_id(&dps_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    if request.api_key_id != caller.api_key_id {
        return Err(ApiError::Forbidden);
    }

    let exists = state
        .sefin
        .check_dps_exists(&dps_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !exists {
        return Err(ApiError::NotFound);
    }

    if req.method() == actix_web::http::Method::HEAD {
        Ok(HttpResponse::Ok().finish())
    } else {
        Ok(HttpResponse::Ok().json(request))
    }
}
