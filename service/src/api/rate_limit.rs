//! Limite de requisicoes por chave de API (secao 5, "rate-limit
//! subsystem uses the broker"; secao 6, `{rpm, burst}`)
//!
//! Janela fixa de um minuto por chave de API: cada requisicao incrementa
//! um contador no broker com expiracao de 60s; a requisicao e aceita
//! enquanto o contador ficar dentro de `rpm + burst`. `memory` reproduz
//! a mesma janela com um mapa local, usado em testes e no modo
//! standalone sem Redis.

use async_trait::async_trait;
use derive_more::{Display, Error as DeriveError};

#[derive(Debug, Display, DeriveError)]
pub enum RateLimitError {
    #[display(fmt = "falha de backend do limitador de requisicoes: {}", _0)]
    Backend(String),
}

/// Limitador de requisicoes por chave de API. `check` retorna `true`
/// quando a requisicao deve prosseguir.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, api_key_id: &str, rpm: u32, burst: u32) -> Result<bool, RateLimitError>;
}

pub struct RedisRateLimiter {
    conn: ::redis::aio::ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(conn: ::redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, api_key_id: &str, rpm: u32, burst: u32) -> Result<bool, RateLimitError> {
        use ::redis::AsyncCommands;

        let window = chrono::Utc::now().timestamp() / 60;
        let key = format!("nfse:ratelimit:{api_key_id}:{window}");
        let mut conn = self.conn.clone();

        let count: u64 = conn.incr(&key, 1).await.map_err(|e| RateLimitError::Backend(e.to_string()))?;
        if count == 1 {
            let _: () = conn.expire(&key, 60).await.map_err(|e| RateLimitError::Backend(e.to_string()))?;
        }

        Ok(count <= (rpm + burst) as u64)
    }
}

pub struct MemoryRateLimiter {
    counters: ::dashmap::DashMap<(String, i64), u64>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self { counters: ::dashmap::DashMap::new() }
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, api_key_id: &str, rpm: u32, burst: u32) -> Result<bool, RateLimitError> {
        let window = chrono::Utc::now().timestamp() / 60;
        let key = (api_key_id.to_string(), window);
        let mut count = self.counters.entry(key).or_insert(0);
        *count += 1;
        Ok(*count <= (rpm + burst) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permite_ate_o_limite_e_bloqueia_depois() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("key1", 3, 2).await.unwrap());
        }
        assert!(!limiter.check("key1", 3, 2).await.unwrap());
    }

    #[tokio::test]
    async fn chaves_diferentes_tem_contadores_independentes() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..5 {
            limiter.check("key1", 3, 2).await.unwrap();
        }
        assert!(limiter.check("key2", 3, 2).await.unwrap());
    }
}
