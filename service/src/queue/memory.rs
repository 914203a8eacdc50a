//! Fila em memoria, usada em testes e no modo standalone do servico.

use super::{Job, JobQueue, Priority, QueueError};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Ciclo de 10 posicoes para o fair-share ponderado 6:3:1 entre as
/// tres filas de prioridade.
const CYCLE: [Priority; 10] = [
    Priority::Critical,
    Priority::Critical,
    Priority::Critical,
    Priority::Default,
    Priority::Critical,
    Priority::Critical,
    Priority::Default,
    Priority::Critical,
    Priority::Default,
    Priority::Low,
];

struct Delayed {
    job: Job,
    ready_at: Instant,
}

#[derive(Default)]
struct Queues {
    critical: VecDeque<Job>,
    default: VecDeque<Job>,
    low: VecDeque<Job>,
    delayed: Vec<Delayed>,
    in_flight: HashSet<String>,
}

impl Queues {
    fn queue_for(&mut self, priority: Priority) -> &mut VecDeque<Job> {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::Default => &mut self.default,
            Priority::Low => &mut self.low,
        }
    }
}

pub struct MemoryQueue {
    queues: Mutex<Queues>,
    round_robin: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            round_robin: AtomicUsize::new(0),
        }
    }

    async fn promote_ready_delayed(&self, queues: &mut Queues) {
        let now = Instant::now();
        let (ready, still_delayed): (Vec<_>, Vec<_>) =
            queues.delayed.drain(..).partition(|d| d.ready_at <= now);
        queues.delayed = still_delayed;
        for delayed in ready {
            queues.queue_for(delayed.job.priority).push_back(delayed.job);
        }
    }

    fn mark_in_flight(queues: &mut Queues, job: &Job) -> Result<(), QueueError> {
        if let Some(task_id) = job.dedup_key() {
            if queues.in_flight.contains(task_id) {
                return Err(QueueError::DuplicateTask(task_id.to_string()));
            }
            queues.in_flight.insert(task_id.to_string());
        }
        Ok(())
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        Self::mark_in_flight(&mut queues, &job)?;
        queues.queue_for(job.priority).push_back(job);
        Ok(())
    }

    async fn enqueue_delayed(&self, job: Job, delay_seconds: u64) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        Self::mark_in_flight(&mut queues, &job)?;
        queues.delayed.push(Delayed {
            job,
            ready_at: Instant::now() + Duration::from_secs(delay_seconds),
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut queues = self.queues.lock().await;
        self.promote_ready_delayed(&mut queues).await;

        if queues.critical.is_empty() && queues.default.is_empty() && queues.low.is_empty() {
            return Ok(None);
        }

        let slot = self.round_robin.fetch_add(1, Ordering::Relaxed) % CYCLE.len();
        let order: [Priority; 3] = match CYCLE[slot] {
            Priority::Critical => [Priority::Critical, Priority::Default, Priority::Low],
            Priority::Default => [Priority::Default, Priority::Critical, Priority::Low],
            Priority::Low => [Priority::Low, Priority::Critical, Priority::Default],
        };

        for priority in order {
            if let Some(job) = queues.queue_for(priority).pop_front() {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn release_dedup(&self, task_id: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        queues.in_flight.remove(task_id);
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues.critical.len() + queues.default.len() + queues.low.len() + queues.delayed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enfileira_e_desenfileira() {
        let queue = MemoryQueue::new();
        queue.enqueue(Job::emission_process("r1")).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.request_id(), Some("r1"));
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejeita_task_id_duplicado_enquanto_em_voo() {
        let queue = MemoryQueue::new();
        queue.enqueue(Job::emission_process("r1")).await.unwrap();
        queue.dequeue().await.unwrap();
        let err = queue.enqueue(Job::emission_process("r1")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateTask(_)));
    }

    #[tokio::test]
    async fn libera_deduplicacao_permite_reenfileirar() {
        let queue = MemoryQueue::new();
        let job = Job::emission_process("r1");
        let task_id = job.dedup_key().unwrap().to_string();
        queue.enqueue(job).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.release_dedup(&task_id).await.unwrap();
        queue.enqueue(Job::emission_process("r1")).await.unwrap();
    }

    #[tokio::test]
    async fn prioridade_critica_e_servida_preferencialmente() {
        let queue = MemoryQueue::new();
        let mut low = Job::emission_process("low1");
        low.priority = Priority::Low;
        let mut critical = Job::emission_process("critical1");
        critical.priority = Priority::Critical;
        queue.enqueue(low).await.unwrap();
        queue.enqueue(critical).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.request_id(), Some("critical1"));
    }

    #[tokio::test]
    async fn job_atrasado_nao_fica_disponivel_de_imediato() {
        let queue = MemoryQueue::new();
        queue.enqueue_delayed(Job::emission_process("r1"), 10).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
