//! Armazenamento de pedidos de emissao (secao 4.I)
//!
//! `EmissionStore` e o trait que o processador e a API usam; `mongo`
//! implementa o backend de producao sobre MongoDB, `memory` um backend
//! em memoria para testes e para o modo standalone do servico.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use derive_more::{Display, Error as DeriveError};
use nfse_core::model::{
    ApiKey, Certificate, EmissionRequest, EmissionResult, EmissionStatus, Rejection, WebhookDelivery,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    ToProcessing,
    ToSuccess,
    ToFailed,
}

#[derive(Debug, Display, DeriveError)]
pub enum StoreError {
    #[display(fmt = "pedido {} nao encontrado", _0)]
    NotFound(String),
    #[display(fmt = "chave de idempotencia {} ja utilizada", _0)]
    DuplicateIdempotencyKey(String),
    #[display(fmt = "transicao de estado invalida a partir de {:?}", _0)]
    InvalidTransition(EmissionStatus),
    #[display(fmt = "falha de backend: {}", _0)]
    Backend(String),
}

/// Persistencia de pedidos de emissao. Implementacoes devem garantir
/// unicidade por `(api_key_id, idempotency_key)` em `insert` e aplicar
/// as transicoes de estado descritas na secao 3 de forma atomica.
#[async_trait]
pub trait EmissionStore: Send + Sync {
    async fn insert(&self, request: EmissionRequest) -> Result<EmissionRequest, StoreError>;

    async fn get(&self, request_id: &str) -> Result<EmissionRequest, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        api_key_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<EmissionRequest>, StoreError>;

    async fn mark_processing(&self, request_id: &str) -> Result<EmissionRequest, StoreError>;

    async fn mark_success(
        &self,
        request_id: &str,
        result: EmissionResult,
    ) -> Result<EmissionRequest, StoreError>;

    async fn mark_failed(
        &self,
        request_id: &str,
        rejection: Rejection,
    ) -> Result<EmissionRequest, StoreError>;

    async fn update_signing_status(
        &self,
        request_id: &str,
        certificate: Certificate,
    ) -> Result<EmissionRequest, StoreError>;

    async fn increment_retry(&self, request_id: &str, last_error: String) -> Result<EmissionRequest, StoreError>;

    /// Busca um pedido pela chave de acesso atribuida pelo SEFIN
    /// (presente apenas apos `mark_success`). Usada por
    /// `GET /v1/nfse/{chaveAcesso}`.
    async fn find_by_access_key(&self, access_key: &str) -> Result<Option<EmissionRequest>, StoreError>;

    /// Busca um pedido pelo identificador de 42 digitos (secao 4.B),
    /// conhecido desde a aceitacao do pedido. Usada por
    /// `GET|HEAD /v1/dps/{id}`.
    async fn find_by_dps_id(&self, dps_id: &str) -> Result<Option<EmissionRequest>, StoreError>;

    /// Lista paginada de pedidos de uma chave de API, mais recentes
    /// primeiro. Usada por `GET /v1/nfse/status`.
    async fn list_by_api_key(
        &self,
        api_key_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<EmissionRequest>, StoreError>;

    /// Pedidos ainda nao terminais (`pending` ou `processing`), mais
    /// antigos primeiro, ate `limit` itens. Usada pela rotina de
    /// recuperacao que reenfileira pedidos orfaos apos uma reinicializacao
    /// do worker (secao 4.K).
    async fn find_pending_requests(&self, limit: u64) -> Result<Vec<EmissionRequest>, StoreError>;
}

/// Persistencia do historico de entregas de webhook (secao 4.L). Cada
/// tentativa atualiza o mesmo documento, identificado por `delivery_id`.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn save_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn get_delivery(&self, delivery_id: &str) -> Result<WebhookDelivery, StoreError>;
}

/// Cadastro de chaves de API (secao 3/6). `find_by_prefix_lookup` nao
/// existe: a busca e sempre por `key_hash`, ja que a chave em texto claro
/// nunca e persistida.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;
}
