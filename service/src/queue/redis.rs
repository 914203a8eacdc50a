//! Fila sobre Redis (secao 4.J, producao)
//!
//! Tres listas (`nfse:queue:critical`, `nfse:queue:default`,
//! `nfse:queue:low`) servidas em proporcao ponderada 6:3:1, um sorted
//! set (`nfse:queue:delayed`) com o timestamp unix de liberacao como
//! score, e um set (`nfse:queue:dedup`) para a deduplicacao por
//! `task_id`.

use super::{Job, JobQueue, Priority, QueueError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicUsize, Ordering};

const CRITICAL_KEY: &str = "nfse:queue:critical";
const DEFAULT_KEY: &str = "nfse:queue:default";
const LOW_KEY: &str = "nfse:queue:low";
const DELAYED_KEY: &str = "nfse:queue:delayed";
const DEDUP_KEY: &str = "nfse:queue:dedup";

/// Ordem de filas para um ciclo completo do round robin ponderado
/// (6 + 3 + 1 = 10 posicoes), repetindo cada chave `peso` vezes.
fn weighted_cycle() -> [&'static str; 10] {
    [
        CRITICAL_KEY,
        CRITICAL_KEY,
        CRITICAL_KEY,
        DEFAULT_KEY,
        CRITICAL_KEY,
        CRITICAL_KEY,
        DEFAULT_KEY,
        CRITICAL_KEY,
        DEFAULT_KEY,
        LOW_KEY,
    ]
}

pub struct RedisQueue {
    conn: ConnectionManager,
    round_robin: AtomicUsize,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, round_robin: AtomicUsize::new(0) }
    }

    fn key_for(priority: Priority) -> &'static str {
        match priority {
            Priority::Critical => CRITICAL_KEY,
            Priority::Default => DEFAULT_KEY,
            Priority::Low => LOW_KEY,
        }
    }

    async fn mark_dedup(&self, conn: &mut ConnectionManager, job: &Job) -> Result<(), QueueError> {
        if let Some(task_id) = job.dedup_key() {
            let added: bool = conn
                .sadd(DEDUP_KEY, task_id)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            if !added {
                return Err(QueueError::DuplicateTask(task_id.to_string()));
            }
        }
        Ok(())
    }

    async fn promote_ready_delayed(&self, conn: &mut ConnectionManager) -> Result<(), QueueError> {
        let now = chrono::Utc::now().timestamp();
        let ready: Vec<String> = conn
            .zrangebyscore(DELAYED_KEY, i64::MIN, now)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        for raw in ready {
            let job: Job = serde_json::from_str(&raw).map_err(|e| QueueError::Backend(e.to_string()))?;
            let _: () = conn
                .zrem(DELAYED_KEY, &raw)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            let _: () = conn
                .rpush(Self::key_for(job.priority), &raw)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.mark_dedup(&mut conn, &job).await?;
        let priority = job.priority;
        let payload = serde_json::to_string(&job).map_err(|e| QueueError::Backend(e.to_string()))?;
        let _: () = conn
            .rpush(Self::key_for(priority), payload)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn enqueue_delayed(&self, job: Job, delay_seconds: u64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.mark_dedup(&mut conn, &job).await?;
        let ready_at = chrono::Utc::now().timestamp() + delay_seconds as i64;
        let payload = serde_json::to_string(&job).map_err(|e| QueueError::Backend(e.to_string()))?;
        let _: () = conn
            .zadd(DELAYED_KEY, payload, ready_at)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn.clone();
        self.promote_ready_delayed(&mut conn).await?;

        let cycle = weighted_cycle();
        let slot = self.round_robin.fetch_add(1, Ordering::Relaxed) % cycle.len();
        let preferred = cycle[slot];
        let order: [&str; 3] = match preferred {
            CRITICAL_KEY => [CRITICAL_KEY, DEFAULT_KEY, LOW_KEY],
            DEFAULT_KEY => [DEFAULT_KEY, CRITICAL_KEY, LOW_KEY],
            _ => [LOW_KEY, CRITICAL_KEY, DEFAULT_KEY],
        };

        for key in order {
            let raw: Option<String> = conn.lpop(key, None).await.map_err(|e| QueueError::Backend(e.to_string()))?;
            if let Some(raw) = raw {
                let job: Job = serde_json::from_str(&raw).map_err(|e| QueueError::Backend(e.to_string()))?;
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn release_dedup(&self, task_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(DEDUP_KEY, task_id)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let critical: usize = conn.llen(CRITICAL_KEY).await.map_err(|e| QueueError::Backend(e.to_string()))?;
        let default: usize = conn.llen(DEFAULT_KEY).await.map_err(|e| QueueError::Backend(e.to_string()))?;
        let low: usize = conn.llen(LOW_KEY).await.map_err(|e| QueueError::Backend(e.to_string()))?;
        let delayed: usize = conn.zcard(DELAYED_KEY).await.map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(critical + default + low + delayed)
    }
}
