//! Worker Pool — a bounded, fixed-size set of slots running the injected
//! executor. Structurally modeled on `bizclaw-agent::orchestrator::Orchestrator`:
//! the pool's own lock is held only to mutate slot bookkeeping, never across
//! the `await` of the executor call (clone the Arc, drop the guard, then
//! await — same discipline as `Orchestrator::send_to`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};

use taskflow_core::traits::{ExecutionContext, ExecutionOutcome, Executor};
use taskflow_core::types::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Running { task_id: String },
    Error,
}

struct Slot {
    state: SlotState,
    started_at: Option<DateTime<Utc>>,
}

/// What the executor did with one task, handed back to the Task Queue for
/// store updates and retry decisions. The pool itself never retries.
pub enum RunOutcome {
    Success(ExecutionOutcome),
    Timeout,
    Error(String),
}

pub struct CompletedRun {
    pub task: Task,
    pub outcome: RunOutcome,
}

struct PoolInner {
    slots: Vec<Slot>,
    fifo: VecDeque<Task>,
    total_processed: u64,
    total_failed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub idle: usize,
    pub running: usize,
    pub error: usize,
    pub queue_length: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub efficiency: f64,
}

/// Bounded set of worker slots. Constructed once by the Task Queue and shared
/// via `Arc`.
pub struct WorkerPool {
    inner: Mutex<PoolInner>,
    notify: Notify,
    stopped: AtomicBool,
    executor: RwLock<Option<Arc<dyn Executor>>>,
    completed_tx: mpsc::UnboundedSender<CompletedRun>,
}

impl WorkerPool {
    pub fn new(capacity: usize, completed_tx: mpsc::UnboundedSender<CompletedRun>) -> Arc<Self> {
        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Idle,
                started_at: None,
            })
            .collect();
        let pool = Arc::new(Self {
            inner: Mutex::new(PoolInner {
                slots,
                fifo: VecDeque::new(),
                total_processed: 0,
                total_failed: 0,
            }),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
            executor: RwLock::new(None),
            completed_tx,
        });
        let dispatcher = Arc::clone(&pool);
        tokio::spawn(async move { dispatcher.dispatch_loop().await });
        pool
    }

    pub async fn set_executor(&self, executor: Arc<dyn Executor>) {
        *self.executor.write().await = Some(executor);
    }

    /// Append a task to the internal FIFO and wake the dispatcher.
    pub async fn submit(&self, task: Task) {
        self.inner.lock().await.fifo.push_back(task);
        self.notify.notify_one();
    }

    pub async fn submit_many(&self, tasks: Vec<Task>) {
        {
            let mut inner = self.inner.lock().await;
            inner.fifo.extend(tasks);
        }
        self.notify.notify_one();
    }

    /// Stop accepting new work and wait up to `deadline` for running slots
    /// to drain.
    pub async fn stop(&self, deadline: Duration) {
        self.stopped.store(true, Ordering::SeqCst);
        let waited = tokio::time::Instant::now();
        loop {
            let running = {
                let inner = self.inner.lock().await;
                inner
                    .slots
                    .iter()
                    .filter(|s| matches!(s.state, SlotState::Running { .. }))
                    .count()
            };
            if running == 0 || waited.elapsed() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Force-release any slot whose task started more than `timeout_ms` ago.
    /// Returns the number recovered. The task itself stays `running` in the
    /// Store until the Task Queue's own timeout path fails it.
    pub async fn recover_stalled(&self, timeout_ms: u64) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut recovered = 0;
        for slot in inner.slots.iter_mut() {
            if let SlotState::Running { .. } = &slot.state
                && let Some(started) = slot.started_at
                && (now - started).num_milliseconds() as u64 > timeout_ms
            {
                slot.state = SlotState::Idle;
                slot.started_at = None;
                recovered += 1;
            }
        }
        recovered
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let idle = inner
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Idle)
            .count();
        let running = inner
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Running { .. }))
            .count();
        let error = inner
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Error)
            .count();
        let total = inner.total_processed + inner.total_failed;
        PoolStats {
            idle,
            running,
            error,
            queue_length: inner.fifo.len(),
            total_processed: inner.total_processed,
            total_failed: inner.total_failed,
            efficiency: if total > 0 {
                inner.total_processed as f64 / total as f64
            } else {
                1.0
            },
        }
    }

    /// Single dispatcher loop: wakes on submit or slot completion, never
    /// spins when the FIFO is empty or no slot is idle.
    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let assigned = self.try_assign().await;
            if !assigned {
                self.notify.notified().await;
            }
        }
    }

    /// Pop the FIFO head onto the first idle slot, if any. Returns whether an
    /// assignment happened (so the caller re-polls instead of sleeping).
    async fn try_assign(self: &Arc<Self>) -> bool {
        let (slot_idx, task) = {
            let mut inner = self.inner.lock().await;
            if inner.fifo.is_empty() {
                return false;
            }
            let Some(slot_idx) = inner
                .slots
                .iter()
                .position(|s| s.state == SlotState::Idle)
            else {
                return false;
            };
            let task = inner.fifo.pop_front().unwrap();
            inner.slots[slot_idx].state = SlotState::Running {
                task_id: task.id.clone(),
            };
            inner.slots[slot_idx].started_at = Some(Utc::now());
            (slot_idx, task)
        };

        let executor = self.executor.read().await.clone();
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            pool.run_slot(slot_idx, task, executor).await;
        });
        true
    }

    async fn run_slot(self: Arc<Self>, slot_idx: usize, task: Task, executor: Option<Arc<dyn Executor>>) {
        let outcome = match executor {
            None => RunOutcome::Error("no executor configured".to_string()),
            Some(executor) => {
                let ctx = ExecutionContext {
                    task_id: task.id.clone(),
                    session_id: task.session_id.clone(),
                    prompt: task.prompt.clone(),
                    mode: task.mode,
                    metadata: task.metadata.clone(),
                };
                match tokio::time::timeout(Duration::from_millis(task.timeout), executor.execute(ctx)).await {
                    Ok(result) if result.success => RunOutcome::Success(result),
                    Ok(result) => RunOutcome::Error(result.error.unwrap_or_else(|| "unknown executor error".into())),
                    Err(_) => RunOutcome::Timeout,
                }
            }
        };

        {
            let mut inner = self.inner.lock().await;
            match &outcome {
                RunOutcome::Success(_) => inner.total_processed += 1,
                _ => inner.total_failed += 1,
            }
            // On error, the slot transitions to `error` then, after a grace
            // period, back to `idle` — no retry here (spec §4.2); retries
            // are the Task Queue's responsibility.
            let slot = &mut inner.slots[slot_idx];
            slot.started_at = None;
            slot.state = if matches!(outcome, RunOutcome::Success(_)) {
                SlotState::Idle
            } else {
                SlotState::Error
            };
        }

        let is_error = !matches!(outcome, RunOutcome::Success(_));
        let _ = self.completed_tx.send(CompletedRun { task, outcome });
        self.notify.notify_one();

        if is_error {
            let pool = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let mut inner = pool.inner.lock().await;
                if inner.slots[slot_idx].state == SlotState::Error {
                    inner.slots[slot_idx].state = SlotState::Idle;
                }
                pool.notify.notify_one();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct OkExecutor;

    #[async_trait]
    impl Executor for OkExecutor {
        async fn execute(&self, context: ExecutionContext) -> ExecutionOutcome {
            ExecutionOutcome::ok(format!("handled {}", context.task_id))
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl Executor for SlowExecutor {
        async fn execute(&self, _context: ExecutionContext) -> ExecutionOutcome {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ExecutionOutcome::ok("too slow")
        }
    }

    fn test_task(timeout: u64) -> Task {
        use taskflow_core::types::{NewTask, Priority, TaskMode};
        let mut t = Task::from_new(NewTask {
            session_id: "s".into(),
            prompt: "p".into(),
            mode: TaskMode::General,
            model: "m".into(),
            priority: Priority::Normal,
            max_attempts: 3,
            retry_delay: 1000,
            timeout,
            scheduled_for: None,
            recurring_rule: None,
            expires_at: None,
            triggered_by: None,
            workflow_id: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
        });
        t.status = taskflow_core::types::TaskStatus::Running;
        t
    }

    #[tokio::test]
    async fn test_pool_runs_submitted_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(2, tx);
        pool.set_executor(Arc::new(OkExecutor)).await;
        pool.submit(test_task(30_000)).await;

        let completed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(completed.outcome, RunOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_pool_respects_capacity() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(1, tx);
        pool.set_executor(Arc::new(SlowExecutor)).await;
        pool.submit(test_task(30_000)).await;
        pool.submit(test_task(30_000)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = pool.stats().await;
        assert_eq!(stats.running, 1);
        assert_eq!(stats.queue_length, 1);
    }

    #[tokio::test]
    async fn test_pool_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(1, tx);
        pool.set_executor(Arc::new(SlowExecutor)).await;
        pool.submit(test_task(10)).await;

        let completed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(completed.outcome, RunOutcome::Timeout));
    }

    #[tokio::test]
    async fn test_recover_stalled() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(1, tx);
        pool.set_executor(Arc::new(SlowExecutor)).await;
        pool.submit(test_task(30_000)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let recovered = pool.recover_stalled(0).await;
        assert_eq!(recovered, 1);
        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1);
    }
}
