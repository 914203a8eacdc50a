//! Binario da API HTTP (secao 5: "one API process, request-per-task
//! handler pool").

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use nfse_service::api::rate_limit::{RateLimiter, RedisRateLimiter};
use nfse_service::api::AppState;
use nfse_service::config::AppConfig;
use nfse_service::queue::redis::RedisQueue;
use nfse_service::queue::JobQueue;
use nfse_service::sefin::mock::MockSefinClient;
use nfse_service::sefin::SefinClient;
use nfse_service::store::mongo::MongoStore;
use nfse_service::store::{ApiKeyStore, EmissionStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().unwrap_or_else(|err| {
        panic!("falha ao carregar configuracao: {err}");
    });

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("falha ao conectar ao MongoDB");
    let database = mongo_client.database(&config.mongo_database);
    let mongo_store = Arc::new(MongoStore::new(&database));
    mongo_store.ensure_indexes().await.expect("falha ao criar indices do MongoDB");
    let store: Arc<dyn EmissionStore> = mongo_store.clone();
    let api_keys: Arc<dyn ApiKeyStore> = mongo_store;

    let redis_client = redis::Client::open(config.redis_uri.as_str()).expect("URI do Redis invalida");
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .expect("falha ao conectar ao Redis");
    let queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::new(redis_conn.clone()));
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(RedisRateLimiter::new(redis_conn));

    // TODO: trocar por um SefinClient HTTP real quando a integracao
    // nacional estiver disponivel neste ambiente.
    let sefin: Arc<dyn SefinClient> = Arc::new(MockSefinClient::new());

    let bind_address = config.bind_address.clone();
    let state = AppState {
        store,
        queue,
        sefin,
        rate_limiter,
        api_keys,
        config: Arc::new(config),
    };

    tracing::info!(bind_address = %bind_address, "iniciando API de emissao de NFS-e");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .configure(nfse_service::api::routes::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}
