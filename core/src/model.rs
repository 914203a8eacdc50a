//! Modelo de dados compartilhado (secao 3)
//!
//! Estes tipos atravessam o pipeline inteiro: o validador os recebe, o
//! construtor de XML os serializa, e o processador de emissao (na crate
//! `nfse-service`) os persiste e transiciona de estado.

use serde::{Deserialize, Serialize};

/// Ambiente de emissao, espelhando o `tpAmb` do XML da DPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Homologation,
}

impl Environment {
    /// Codigo numerico usado no XML (`tpAmb`): 1 = producao, 2 = homologacao.
    pub fn code(self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }
}

/// Estado do ciclo de vida de uma `EmissionRequest` (secao 3, "status").
/// A maquina de estados nunca anda para tras: o processador verifica o
/// estado atual e descarta transicoes invalidas em vez de forcar um
/// compare-and-set no armazenamento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl EmissionStatus {
    /// `true` para os dois estados terminais do pipeline.
    pub fn is_terminal(self) -> bool {
        matches!(self, EmissionStatus::Success | EmissionStatus::Failed)
    }
}

/// Valores monetarios de uma DPS, antes e depois do calculo de ISS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Values {
    pub service_value: f64,
    #[serde(default)]
    pub unconditional_discount: f64,
    #[serde(default)]
    pub conditional_discount: f64,
    #[serde(default)]
    pub deductions: f64,
    pub iss_rate: f64,
}

/// Tomador do servico. Exatamente um entre `cnpj`/`cpf`/`nif` deve estar
/// presente (validado pelo componente D, nao por este tipo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnpj: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nif: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Endereco nacional ou estrangeiro, usado pelo tomador e pelo prestador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    pub district: String,
    /// Codigo IBGE do municipio (7 digitos). `None` para enderecos
    /// estrangeiros.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    /// Codigo de pais ISO-3166 alpha-2. `None`/`"BR"` para enderecos
    /// nacionais.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

/// Identificacao de serie e numero do DPS (distinto do identificador de
/// 42 digitos de `dpsid::DpsId`, que e derivado destes campos mais o
/// municipio e a inscricao federal do prestador).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpsNumbering {
    pub series: String,
    pub number: String,
    /// Chave de acesso da NFS-e substituida, quando esta DPS e emitida
    /// para substituir uma NFS-e ja autorizada. `None` para emissao
    /// normal; o elemento `subst` e obrigatorio no XML de qualquer
    /// forma, apenas vazio nesse caso.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substituted_access_key: Option<String>,
}

/// Prestador de servico emissor da DPS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnpj: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    pub name: String,
    pub municipality_code: String,
}

/// Descricao do servico prestado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub national_code: String,
    pub description: String,
    pub municipality_code: String,
}

/// Material de certificado digital em memoria. Os campos sensiveis
/// (`pfx` e `password`) sao zerados assim que `is_signed = true` ou o
/// pedido atinge um estado terminal (invariante da secao 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfx: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl Certificate {
    /// Limpa o material secreto (PFX e senha) preservando os metadados
    /// ja extraidos do X.509. Chamado pelo armazenamento de emissao ao
    /// aplicar `UpdateSigningStatus` (secao 4.I) e pelo processador ao
    /// finalizar um pedido em estado terminal.
    pub fn scrub_secret_material(&mut self) {
        self.pfx = None;
        self.password = None;
    }

    pub fn has_secret_material(&self) -> bool {
        self.pfx.is_some() || self.password.is_some()
    }
}

/// Resultado de uma emissao aceita pelo SEFIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionResult {
    pub access_key: String,
    pub nfse_number: String,
    pub xml: String,
}

/// Rejeicao terminal (governo ou erro interno do pipeline), ja traduzida
/// pelo componente M.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: String,
    pub message: String,
    pub description: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub government_code: Option<String>,
    pub category: RejectionCategory,
    pub retryable: bool,
}

/// Categoria de rejeicao da secao 3/4.M.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    Validation,
    Certificate,
    Duplicate,
    NotFound,
    Permission,
    Service,
    Unknown,
}

/// Agregado raiz: um pedido de emissao de NFS-e.
///
/// Invariantes (secao 3): `request_id` e unico; exatamente um entre
/// `{result, rejection}` esta presente quando `status` e terminal;
/// `is_presigned` implica `presigned_xml` presente; o material secreto
/// do certificado e zerado assim que assinado ou terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionRequest {
    pub request_id: String,
    pub api_key_id: String,
    pub idempotency_key: String,
    pub status: EmissionStatus,
    pub environment: Environment,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker: Option<Taker>,
    pub service: Service,
    pub values: Values,
    pub dps: DpsNumbering,
    /// Identificador de 42 digitos (secao 4.B), conhecido assim que o
    /// pedido e aceito (calculado a partir de `provider`/`dps` para
    /// emissao estruturada, extraido do XML para emissao pre-assinada).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dps_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub is_presigned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_xml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EmissionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Estado de uma tentativa de entrega de webhook (secao 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

/// Agregado de entrega de webhook (secao 3, secao 4.L): registra cada
/// notificacao enviada a `url` para um pedido de emissao, incluindo o
/// historico de tentativas e a ultima resposta recebida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    pub request_id: String,
    pub api_key_id: String,
    pub url: String,
    pub payload: serde_json::Value,
    pub status: WebhookDeliveryStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl WebhookDelivery {
    /// Trunca a ultima resposta registrada para evitar que um corpo de
    /// resposta arbitrariamente grande infle o documento persistido
    /// (secao 3, "last_response (truncated)").
    pub const MAX_RESPONSE_LEN: usize = 2048;

    pub fn truncate_response(body: &str) -> String {
        if body.len() <= Self::MAX_RESPONSE_LEN {
            body.to_string()
        } else {
            let mut truncated = body.chars().take(Self::MAX_RESPONSE_LEN).collect::<String>();
            truncated.push_str("...[truncado]");
            truncated
        }
    }
}

/// Credencial de acesso a API, uma por cliente integrado (secao 3/6).
/// `key_hash` e o SHA-256 da chave apresentada no cabecalho `X-Api-Key`
/// (a chave em texto claro nunca e persistida); `key_prefix` e os
/// primeiros caracteres da chave, mantidos em claro apenas para exibicao
/// em paineis de suporte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub api_key_id: String,
    pub key_hash: String,
    pub key_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_rpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_burst: Option<u32>,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EmissionRequest {
    /// Verifica as duas invariantes de consistencia de estado da secao 3
    /// que nao sao impostas pelo sistema de tipos: exclusividade de
    /// `result`/`rejection` e a obrigatoriedade de `presigned_xml` quando
    /// `is_presigned`.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.status.is_terminal() {
            match (&self.result, &self.rejection) {
                (Some(_), None) | (None, Some(_)) => {}
                (Some(_), Some(_)) => {
                    return Err("result e rejection nao podem estar ambos presentes")
                }
                (None, None) => return Err("estado terminal exige result ou rejection"),
            }
        } else if self.result.is_some() || self.rejection.is_some() {
            return Err("result/rejection presentes antes de um estado terminal");
        }

        if self.is_presigned && self.presigned_xml.is_none() {
            return Err("is_presigned exige presigned_xml");
        }

        Ok(())
    }
}
