//! API HTTP (secao 6): estado compartilhado, middleware e handlers.

pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod routes;

use crate::config::AppConfig;
use crate::queue::JobQueue;
use crate::sefin::SefinClient;
use crate::store::{ApiKeyStore, EmissionStore};
use rate_limit::RateLimiter;
use std::sync::Arc;

/// Estado compartilhado entre todos os handlers da API.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EmissionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub sefin: Arc<dyn SefinClient>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub config: Arc<AppConfig>,
}
