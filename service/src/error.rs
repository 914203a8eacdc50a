//! Erro de fronteira HTTP da API (secao 6)
//!
//! Traduz os erros internos (`nfse_core::Error`, falhas de
//! armazenamento/fila) para respostas `problem+json` com o codigo de
//! status apropriado, sem vazar detalhes internos de infraestrutura.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use derive_more::{Display, Error as DeriveError};
use nfse_core::validators::FieldError;
use serde::Serialize;

#[derive(Debug, Display, DeriveError)]
pub enum ApiError {
    #[display(fmt = "{} campo(s) invalido(s)", "_0.len()")]
    Validation(#[error(not(source))] Vec<FieldError>),
    #[display(fmt = "recurso nao encontrado")]
    NotFound,
    #[display(fmt = "conflito: {}", _0)]
    Conflict(String),
    #[display(fmt = "chave de API invalida ou ausente")]
    Unauthorized,
    #[display(fmt = "acesso negado a este recurso")]
    Forbidden,
    #[display(fmt = "limite de requisicoes excedido")]
    RateLimited,
    #[display(fmt = "certificado excede o tamanho maximo permitido")]
    PayloadTooLarge,
    #[display(fmt = "falha interna: {}", _0)]
    Internal(String),
}

#[derive(Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let errors = match self {
            ApiError::Validation(fields) => fields.clone(),
            _ => Vec::new(),
        };
        let body = ProblemDetails {
            kind: "about:blank",
            title: self.to_string(),
            status: self.status_code().as_u16(),
            errors,
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<nfse_core::Error> for ApiError {
    fn from(err: nfse_core::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
