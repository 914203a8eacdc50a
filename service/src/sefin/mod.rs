//! Integracao com o SEFIN (Sistema Nacional de Emissao Federal NFS-e)
//!
//! `SefinClient` isola o processador da integracao HTTP real, permitindo
//! substitui-la por [`mock::MockSefinClient`] em testes e em ambientes
//! sem acesso ao backend nacional.

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Display, Error as DeriveError};
use nfse_core::model::{EmissionResult, Rejection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Display, DeriveError)]
pub enum SefinError {
    #[display(fmt = "SEFIN indisponivel: {}", _0)]
    Unavailable(String),
    #[display(fmt = "tempo limite excedido ao contatar o SEFIN")]
    Timeout,
    #[display(fmt = "resposta do SEFIN malformada: {}", _0)]
    MalformedResponse(String),
}

/// Resultado de uma submissao ao SEFIN: aceita (com o resultado final)
/// ou rejeitada (com a rejeicao ja traduzida pelo componente M).
pub enum SefinOutcome {
    Accepted(EmissionResult),
    Rejected(Rejection),
}

/// Evento associado a uma NFS-e ja autorizada (cancelamento, carta de
/// correcao, substituicao), retornado por
/// `GET /v1/nfse/{chaveAcesso}/eventos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NfseEvent {
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub description: String,
}

#[async_trait]
pub trait SefinClient: Send + Sync {
    async fn submit_dps(&self, signed_xml: &str) -> Result<SefinOutcome, SefinError>;

    async fn query_status(&self, access_key: &str) -> Result<SefinOutcome, SefinError>;

    /// Consulta os eventos de uma NFS-e ja autorizada. `event_type`
    /// filtra por tipo (`tipo` na query string) quando presente.
    async fn query_events(
        &self,
        access_key: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<NfseEvent>, SefinError>;

    /// Consulta o SEFIN pelo identificador de 42 digitos da DPS,
    /// retornando o resultado mais recente conhecido nacionalmente, ou
    /// `None` se o SEFIN nao tem registro dessa DPS. Usada por
    /// `GET|HEAD /v1/dps/{id}` (secao 6) para confirmar que a posse do
    /// certificado corresponde a uma DPS de fato submetida.
    async fn lookup_dps(&self, dps_id: &str) -> Result<Option<SefinOutcome>, SefinError>;

    /// Checagem mais barata que `lookup_dps`: apenas confirma que o
    /// SEFIN tem registro da DPS, sem trazer o resultado completo.
    async fn check_dps_exists(&self, dps_id: &str) -> Result<bool, SefinError>;
}
