//! Health Monitor — one tick loop sampling Store/Queue/Worker/Memory health,
//! same shape as the dispatcher/scheduler/retention-sweeper loops (spec §4.6).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use taskflow_core::types::QueueStats;
use taskflow_queue::TaskQueue;
use taskflow_store::TaskStore;

use crate::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct StoreHealth {
    pub connected: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QueueHealth {
    pub pending: u64,
    pub oldest_pending_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerHealth {
    pub active: usize,
    pub idle: usize,
    pub stalled: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryHealth {
    pub used_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
}

impl MemoryHealth {
    fn fraction(&self) -> Option<f64> {
        match (self.used_bytes, self.total_bytes) {
            (Some(u), Some(t)) if t > 0 => Some(u as f64 / t as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub score: u32,
    pub store: StoreHealth,
    pub queue: QueueHealth,
    pub worker: WorkerHealth,
    pub memory: MemoryHealth,
    pub queue_stats: QueueStats,
    pub sampled_at: chrono::DateTime<Utc>,
}

pub struct HealthMonitor {
    store: Arc<dyn TaskStore>,
    queue: Arc<TaskQueue>,
    task_timeout_ms: u64,
    latest: RwLock<Option<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<TaskQueue>, task_timeout_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            task_timeout_ms,
            latest: RwLock::new(None),
        })
    }

    pub fn spawn(self: &Arc<Self>, interval: Duration) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.sampler_loop(interval).await });
    }

    pub async fn latest(&self) -> Option<HealthSnapshot> {
        self.latest.read().await.clone()
    }

    async fn sampler_loop(self: Arc<Self>, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            let snapshot = self.sample().await;
            *self.latest.write().await = Some(snapshot);
        }
    }

    pub async fn sample(&self) -> HealthSnapshot {
        let store_started = std::time::Instant::now();
        let store_query_ok = self.store.get_queue_stats(None).await;
        let latency_ms = store_started.elapsed().as_millis() as u64;
        let connected = store_query_ok.is_ok();
        let queue_stats = store_query_ok.unwrap_or_default();

        let store = StoreHealth {
            connected,
            latency_ms,
        };

        let oldest_pending_ms = self.oldest_pending_age_ms().await;
        let queue = QueueHealth {
            pending: queue_stats.pending_tasks,
            oldest_pending_ms,
        };

        let stalled = self.queue.pool().recover_stalled(self.task_timeout_ms).await;
        let pool_stats = self.queue.pool_stats().await;
        let worker = WorkerHealth {
            active: pool_stats.running,
            idle: pool_stats.idle,
            stalled,
        };

        let memory = match mem::sample() {
            Some((used, total)) => MemoryHealth {
                used_bytes: Some(used),
                total_bytes: Some(total),
            },
            None => MemoryHealth {
                used_bytes: None,
                total_bytes: None,
            },
        };

        let status = derive_status(&store, &queue, &worker, &memory);
        let score = derive_score(&store, &queue, &worker, &memory);

        HealthSnapshot {
            status,
            score,
            store,
            queue,
            worker,
            memory,
            queue_stats,
            sampled_at: Utc::now(),
        }
    }

    async fn oldest_pending_age_ms(&self) -> u64 {
        match self.store.get_pending_dispatch(10_000).await {
            Ok(tasks) => {
                let now = Utc::now();
                tasks
                    .iter()
                    .map(|t| (now - t.created_at).num_milliseconds().max(0) as u64)
                    .max()
                    .unwrap_or(0)
            }
            Err(_) => 0,
        }
    }
}

fn derive_status(
    store: &StoreHealth,
    queue: &QueueHealth,
    worker: &WorkerHealth,
    memory: &MemoryHealth,
) -> HealthStatus {
    let memory_critical = memory.fraction().is_some_and(|f| f > 0.9);
    if !store.connected || memory_critical {
        return HealthStatus::Unhealthy;
    }
    if queue.oldest_pending_ms > 30_000 || worker.stalled > 0 {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

fn derive_score(
    store: &StoreHealth,
    queue: &QueueHealth,
    worker: &WorkerHealth,
    memory: &MemoryHealth,
) -> u32 {
    let mut score: i32 = 100;
    match memory.fraction() {
        Some(f) if f > 0.9 => score -= 40,
        Some(f) if f > 0.75 => score -= 20,
        _ => {}
    }
    score -= 10 * worker.stalled as i32;
    if queue.oldest_pending_ms > 60_000 {
        score -= 20;
    }
    if store.latency_ms > 500 {
        score -= 15;
    }
    score.max(0) as u32
}
