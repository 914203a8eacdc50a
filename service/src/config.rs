//! Configuracao do servico, carregada de variaveis de ambiente com o
//! prefixo `NFSE_` (via crate `config`), seguindo o padrao de
//! configuracao-por-ambiente do restante do stack.

use config::{Config as RawConfig, ConfigError, Environment};
use serde::Deserialize;

fn default_queue_poll_interval_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    5
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_rate_limit_rpm() -> u32 {
    60
}

fn default_rate_limit_burst() -> u32 {
    10
}

fn default_max_certificate_bytes() -> usize {
    50 * 1024
}

/// Configuracao completa do servico. Cada campo tem um correspondente
/// `NFSE_<CAMPO_EM_MAIUSCULO>` no ambiente (ex.: `NFSE_MONGO_URI`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub sefin_base_url: String,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Segredo usado para assinar webhooks (HMAC-SHA256). A secao 3
    /// descreve um `webhook_secret` por chave de API; como este servico
    /// nao administra um cadastro completo de chaves, um unico segredo
    /// configurado vale para todos os pedidos ate que esse cadastro
    /// exista.
    pub webhook_signing_secret: String,
    #[serde(default = "default_max_retries")]
    pub webhook_max_retries: u32,
    /// Limite padrao de requisicoes por minuto por chave de API, usado
    /// pelo middleware de limite de requisicoes (secao 5/6) sobre o
    /// mesmo broker Redis da fila de jobs.
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_default_rpm: u32,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
    /// Tamanho maximo aceito para o certificado PFX enviado via
    /// multipart em `GET|HEAD /v1/dps/{id}` (secao 6).
    #[serde(default = "default_max_certificate_bytes")]
    pub max_certificate_bytes: usize,
    /// Resolve a questao em aberto sobre reassinatura: quando `true`, uma
    /// DPS pre-assinada enviada com certificado tambem presente e
    /// reassinada pelo servico em vez de usada como veio. Default `false`
    /// (a DPS pre-assinada e a fonte de verdade quando presente).
    #[serde(default)]
    pub resign_on_replay: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let raw = RawConfig::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("mongo_database", "nfse")?
            .set_default("queue_poll_interval_ms", 250)?
            .set_default("max_retries", 5)?
            .set_default("webhook_timeout_secs", 10)?
            .set_default("webhook_max_retries", 5)?
            .set_default("rate_limit_default_rpm", 60)?
            .set_default("rate_limit_burst", 10)?
            .set_default("max_certificate_bytes", 50 * 1024)?
            .set_default("resign_on_replay", false)?
            .add_source(Environment::with_prefix("nfse").try_parsing(true))
            .build()?;

        raw.try_deserialize()
    }
}
