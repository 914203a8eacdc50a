//! Autenticacao por chave de API e limite de requisicoes (secao 6)
//!
//! A autorizacao de chave de API e a contagem de limite de requisicoes
//! vivem fora do armazenamento de pedidos: a chave carrega seu proprio
//! `{rpm, burst}`, e o contador de limite usa o mesmo broker Redis da
//! fila de jobs (secao 5, "rate-limit subsystem uses the broker").

use super::AppState;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};
use std::rc::Rc;

/// Identidade resolvida de uma chave de API autenticada.
#[derive(Debug, Clone)]
pub struct ApiKeyIdentity {
    pub api_key_id: String,
}

const API_KEY_HEADER: &str = "X-Api-Key";

/// SHA-256 da chave apresentada, em hexadecimal minusculo — a mesma
/// forma armazenada em `ApiKey::key_hash` (a chave em texto claro nunca
/// e persistida nem comparada diretamente).
fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub struct ApiKeyAuth;

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ApiKeyAuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware { service: Rc::new(service) }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let api_key = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let (Some(key), Some(state)) = (api_key, state) else {
                return Err(actix_web::error::ErrorUnauthorized("chave de API ausente ou invalida"));
            };
            if key.is_empty() {
                return Err(actix_web::error::ErrorUnauthorized("chave de API ausente ou invalida"));
            }

            let key_hash = hash_api_key(&key);
            let found = state
                .api_keys
                .find_by_key_hash(&key_hash)
                .await
                .map_err(|err| {
                    tracing::warn!(%err, "falha ao consultar o cadastro de chaves de API");
                    actix_web::error::ErrorInternalServerError("falha ao validar chave de API")
                })?;

            match found {
                Some(api_key) if api_key.active => {
                    req.extensions_mut().insert(ApiKeyIdentity { api_key_id: api_key.api_key_id });
                    service.call(req).await
                }
                _ => Err(actix_web::error::ErrorUnauthorized("chave de API ausente ou invalida")),
            }
        })
    }
}

/// Limite de requisicoes, aplicado apos [`ApiKeyAuth`] (precisa da
/// [`ApiKeyIdentity`] ja resolvida nas extensoes da requisicao).
pub struct RateLimit;

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware { service: Rc::new(service) }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let identity = req.extensions().get::<ApiKeyIdentity>().cloned();
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            if let (Some(identity), Some(state)) = (identity, state) {
                let allowed = state
                    .rate_limiter
                    .check(&identity.api_key_id, state.config.rate_limit_default_rpm, state.config.rate_limit_burst)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(%err, "falha ao consultar o limitador de requisicoes, permitindo a chamada");
                        true
                    });
                if !allowed {
                    return Err(actix_web::error::ErrorTooManyRequests("limite de requisicoes excedido"));
                }
            }
            service.call(req).await
        })
    }
}
