//! Binario do worker de emissao (secao 5: pool de workers que consomem
//! a fila e chamam o processador; parada em duas fases - parar de
//! puxar jobs novos, drenar os em andamento ate um prazo, entao forcar).

use nfse_service::config::AppConfig;
use nfse_service::processor::{ProcessOutcome, Processor};
use nfse_service::queue::{backoff_seconds, redis::RedisQueue, Job, JobQueue, TASK_EMISSION_PROCESS, TASK_WEBHOOK_DELIVERY};
use nfse_service::sefin::mock::MockSefinClient;
use nfse_service::store::mongo::MongoStore;
use nfse_service::store::{EmissionStore, WebhookStore};
use nfse_service::webhook;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
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

    let redis_client = redis::Client::open(config.redis_uri.as_str()).expect("URI do Redis invalida");
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .expect("falha ao conectar ao Redis");
    let queue = Arc::new(RedisQueue::new(redis_conn));

    // TODO: trocar por um SefinClient HTTP real quando a integracao
    // nacional estiver disponivel neste ambiente.
    let sefin = Arc::new(MockSefinClient::new());
    let processor = Arc::new(Processor::new(
        mongo_store.clone(),
        sefin,
        queue.clone(),
        mongo_store.clone(),
    ));
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.webhook_timeout_secs))
        .build()
        .expect("falha ao construir cliente HTTP de webhooks");

    let stopping = Arc::new(AtomicBool::new(false));
    let stopping_signal = stopping.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        tracing::info!("sinal de parada recebido, interrompendo a captacao de novos jobs");
        stopping_signal.store(true, Ordering::SeqCst);
    });

    let poll_interval = Duration::from_millis(config.queue_poll_interval_ms);
    tracing::info!("worker de emissao iniciado");

    while !stopping.load(Ordering::SeqCst) {
        let job = match queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(err) => {
                tracing::warn!(%err, "falha ao retirar job da fila");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        run_job(&processor, &mongo_store, &queue, &http_client, &config, job).await;
    }

    tracing::info!("worker encerrado");
}

async fn run_job(
    processor: &Processor<MongoStore, MockSefinClient>,
    webhook_store: &Arc<MongoStore>,
    queue: &Arc<RedisQueue>,
    http_client: &reqwest::Client,
    config: &AppConfig,
    job: Job,
) {
    tracing::info!(
        task_id = ?job.task_id,
        task_type = %job.task_type,
        attempt = job.attempt,
        "processando job"
    );

    let outcome = match job.task_type.as_str() {
        TASK_EMISSION_PROCESS => match job.request_id() {
            Some(request_id) => processor.process(request_id).await,
            None => {
                tracing::warn!("job emission:process sem request_id no payload, descartando");
                ProcessOutcome::Done
            }
        },
        TASK_WEBHOOK_DELIVERY => match job.delivery_id() {
            Some(delivery_id) => run_webhook_job(webhook_store, http_client, config, delivery_id).await,
            None => {
                tracing::warn!("job webhook:delivery sem delivery_id no payload, descartando");
                ProcessOutcome::Done
            }
        },
        other => {
            tracing::warn!(task_type = other, "tipo de tarefa desconhecido, descartando");
            ProcessOutcome::Done
        }
    };

    if let Some(task_id) = job.dedup_key() {
        if let Err(err) = queue.release_dedup(task_id).await {
            tracing::warn!(%err, "falha ao liberar deduplicacao do job");
        }
    }

    match outcome {
        ProcessOutcome::Done => {}
        ProcessOutcome::Retry => {
            if job.attempt + 1 > job.max_retry {
                tracing::warn!(
                    task_type = %job.task_type,
                    task_id = ?job.task_id,
                    "limite de retentativas excedido"
                );
                if job.task_type == TASK_WEBHOOK_DELIVERY {
                    if let Some(delivery_id) = job.delivery_id() {
                        if let Ok(delivery) = webhook_store.get_delivery(delivery_id).await {
                            let _ = webhook::mark_exhausted(webhook_store.as_ref(), delivery).await;
                        }
                    }
                }
                return;
            }
            let mut next = job;
            next.attempt += 1;
            let delay = backoff_seconds(next.attempt);
            if let Err(err) = queue.enqueue_delayed(next, delay).await {
                tracing::warn!(%err, "falha ao reenfileirar job com backoff");
            }
        }
    }
}

async fn run_webhook_job(
    webhook_store: &Arc<MongoStore>,
    http_client: &reqwest::Client,
    config: &AppConfig,
    delivery_id: &str,
) -> ProcessOutcome {
    let delivery = match webhook_store.get_delivery(delivery_id).await {
        Ok(delivery) => delivery,
        Err(err) => {
            tracing::warn!(delivery_id, %err, "entrega de webhook nao encontrada, descartando job");
            return ProcessOutcome::Done;
        }
    };

    let (delivery, outcome) = webhook::attempt_delivery(
        http_client,
        webhook_store.as_ref(),
        delivery,
        &config.webhook_signing_secret,
    )
    .await;

    match outcome {
        webhook::DeliveryOutcome::Delivered => {
            tracing::info!(request_id = %delivery.request_id, "webhook entregue");
            ProcessOutcome::Done
        }
        webhook::DeliveryOutcome::Retry => ProcessOutcome::Retry,
    }
}
