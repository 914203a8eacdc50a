//! Fila de processamento assincrono (secao 4.J)
//!
//! `JobQueue` e o trait usado pela API (para enfileirar) e pelo worker
//! (para consumir). `redis` implementa o backend de producao com
//! filas por prioridade e deduplicacao por `task_id`; `memory` um
//! backend local equivalente para testes.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Display, Error as DeriveError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tipo de tarefa para o processamento de uma emissao (secao 4.K).
pub const TASK_EMISSION_PROCESS: &str = "emission:process";
/// Tipo de tarefa para a entrega de um webhook (secao 4.L).
pub const TASK_WEBHOOK_DELIVERY: &str = "webhook:delivery";

/// Prioridade de uma tarefa, servida em proporcao ponderada 6:3:1
/// (secao 4.J). `Critical` e usada para reprocessamento apos falha
/// transitoria e para a entrega de webhooks, para nao atrasar essas
/// tarefas atras da fila padrao.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Default,
    Low,
}

impl Priority {
    pub fn weight(self) -> usize {
        match self {
            Priority::Critical => 6,
            Priority::Default => 3,
            Priority::Low => 1,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Default
    }
}

fn default_max_retry() -> u32 {
    5
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Tarefa enfileirada (secao 4.J). `payload` carrega os dados
/// especificos do tipo de tarefa (ex.: `request_id` para
/// `emission:process`, `delivery_id` para `webhook:delivery`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout: u64,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub process_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub process_in: Option<u64>,
    #[serde(default)]
    pub retention: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub attempt: u32,
}

fn emission_task_id(request_id: &str) -> String {
    format!("{TASK_EMISSION_PROCESS}:{request_id}")
}

fn webhook_task_id(delivery_id: &str) -> String {
    format!("{TASK_WEBHOOK_DELIVERY}:{delivery_id}")
}

impl Job {
    /// Primeira tentativa de uma tarefa `emission:process` para
    /// `request_id`, deduplicada pelo proprio `request_id`.
    pub fn emission_process(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let task_id = emission_task_id(&request_id);
        Self {
            task_type: TASK_EMISSION_PROCESS.to_string(),
            payload: serde_json::json!({ "request_id": request_id }),
            max_retry: default_max_retry(),
            timeout: default_timeout_seconds(),
            task_id: Some(task_id),
            process_at: None,
            process_in: None,
            retention: None,
            priority: Priority::Default,
            attempt: 0,
        }
    }

    /// Primeira tentativa de uma tarefa `webhook:delivery` para a
    /// entrega identificada por `delivery_id`, deduplicada por ela.
    pub fn webhook_delivery(delivery_id: impl Into<String>) -> Self {
        let delivery_id = delivery_id.into();
        let task_id = webhook_task_id(&delivery_id);
        Self {
            task_type: TASK_WEBHOOK_DELIVERY.to_string(),
            payload: serde_json::json!({ "delivery_id": delivery_id }),
            max_retry: default_max_retry(),
            timeout: default_timeout_seconds(),
            task_id: Some(task_id),
            process_at: None,
            process_in: None,
            retention: None,
            priority: Priority::Critical,
            attempt: 0,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.payload.get("request_id").and_then(Value::as_str)
    }

    pub fn delivery_id(&self) -> Option<&str> {
        self.payload.get("delivery_id").and_then(Value::as_str)
    }

    /// Chave usada para a deduplicacao por `task_id` (secao 5). Tarefas
    /// sem `task_id` explicito nunca sao deduplicadas.
    pub fn dedup_key(&self) -> Option<&str> {
        self.task_id.as_deref()
    }
}

/// Atraso de retentativa com backoff exponencial limitado a 300s,
/// conforme secao 4.J: `min(10 * 2^attempt, 300)`.
pub fn backoff_seconds(attempt: u32) -> u64 {
    let exponential = 10u64.saturating_mul(1u64 << attempt.min(10));
    exponential.min(300)
}

#[derive(Debug, Display, DeriveError)]
pub enum QueueError {
    #[display(fmt = "job com task_id {} ja esta na fila", _0)]
    DuplicateTask(String),
    #[display(fmt = "falha de backend da fila: {}", _0)]
    Backend(String),
}

/// Fila de tarefas com prioridade ponderada (`critical:6, default:3,
/// low:1`) e deduplicacao por `task_id` (secao 4.J).
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    async fn enqueue_delayed(&self, job: Job, delay_seconds: u64) -> Result<(), QueueError>;

    /// Retira a proxima tarefa disponivel, respeitando o peso relativo
    /// das tres filas de prioridade (fair-share ponderado).
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Libera a trava de deduplicacao de `task_id`. Deve ser chamada
    /// quando o processamento da tentativa atual termina — com
    /// sucesso, falha terminal, ou imediatamente antes de reenfileirar
    /// para nova tentativa — nunca no momento do `dequeue`, para que
    /// uma duplicata submetida enquanto a tarefa original esta em voo
    /// seja rejeitada (secao 5: "at most once concurrently").
    async fn release_dedup(&self, task_id: &str) -> Result<(), QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_cresce_exponencialmente_ate_o_teto() {
        assert_eq!(backoff_seconds(0), 10);
        assert_eq!(backoff_seconds(1), 20);
        assert_eq!(backoff_seconds(2), 40);
        assert_eq!(backoff_seconds(10), 300);
        assert_eq!(backoff_seconds(20), 300);
    }

    #[test]
    fn pesos_de_prioridade_seguem_6_3_1() {
        assert_eq!(Priority::Critical.weight(), 6);
        assert_eq!(Priority::Default.weight(), 3);
        assert_eq!(Priority::Low.weight(), 1);
    }

    #[test]
    fn job_de_emissao_carrega_request_id_no_payload() {
        let job = Job::emission_process("r1");
        assert_eq!(job.request_id(), Some("r1"));
        assert_eq!(job.task_type, TASK_EMISSION_PROCESS);
        assert_eq!(job.dedup_key(), Some("emission:process:r1"));
    }

    #[test]
    fn job_de_webhook_carrega_delivery_id_no_payload() {
        let job = Job::webhook_delivery("d1");
        assert_eq!(job.delivery_id(), Some("d1"));
        assert_eq!(job.task_type, TASK_WEBHOOK_DELIVERY);
        assert_eq!(job.priority, Priority::Critical);
    }
}
