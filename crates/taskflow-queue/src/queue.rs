//! Task Queue — the lifecycle controller driving the Store -> Worker Pool
//! pipeline (spec §4.3).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};

use taskflow_core::error::{Result, TaskFlowError};
use taskflow_core::traits::Executor;
use taskflow_core::types::{NewTask, Priority, QueueStats, Task, TaskStatus};
use taskflow_store::TaskStore;

use crate::pool::{CompletedRun, PoolStats, RunOutcome, WorkerPool};

/// One event emitted per completed dispatch cycle step, consumed by the
/// Trigger Engine's `chain` triggers (spec §4.4).
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Completed(Task),
    Retry(Task),
    Failed(Task),
    Cancelled(Task),
}

/// `delay = min(base * 2^(attempts-1), 300_000)` — spec §4.3 backoff formula,
/// same exponential-with-cap shape as `bizclaw-scheduler::tasks::RetryPolicy::next_delay`.
pub fn backoff_delay(base_ms: u64, attempts: u32) -> u64 {
    const MAX_DELAY_MS: u64 = 300_000;
    if attempts == 0 {
        return base_ms.min(MAX_DELAY_MS);
    }
    let multiplier = 2u64.saturating_pow(attempts - 1);
    base_ms.saturating_mul(multiplier).min(MAX_DELAY_MS)
}

pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
    max_concurrent: usize,
    /// Ids currently claimed for running, guarded by a mutex (spec §5 shared
    /// resource policy).
    running: Mutex<HashSet<String>>,
    notify: Notify,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        max_concurrent: usize,
        pool_capacity: usize,
        events_tx: mpsc::UnboundedSender<TaskEvent>,
    ) -> Arc<Self> {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(pool_capacity, completed_tx);
        let queue = Arc::new(Self {
            store,
            pool,
            max_concurrent,
            running: Mutex::new(HashSet::new()),
            notify: Notify::new(),
            events_tx,
        });

        let dispatcher = Arc::clone(&queue);
        tokio::spawn(async move { dispatcher.dispatch_loop().await });

        let collector = Arc::clone(&queue);
        tokio::spawn(async move { collector.collect_loop(completed_rx).await });

        queue
    }

    pub async fn set_executor(&self, executor: Arc<dyn Executor>) {
        self.pool.set_executor(executor).await;
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    // ── Public API (spec §4.3) ──────────────────────────────

    pub async fn submit(&self, spec: NewTask) -> Result<Task> {
        let task = self.store.create_task(spec).await?;
        self.notify.notify_one();
        Ok(task)
    }

    pub async fn submit_batch(&self, specs: Vec<NewTask>) -> Result<Vec<Task>> {
        if specs.len() > 100 {
            return Err(TaskFlowError::invalid_input(
                "batch submit accepts at most 100 tasks",
            ));
        }
        let tasks = self.store.create_tasks_batch(specs).await?;
        self.notify.notify_one();
        Ok(tasks)
    }

    pub async fn cancel(&self, id: &str) -> Result<()> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| TaskFlowError::not_found(format!("task {id}")))?;
        if task.status == TaskStatus::Running {
            return Err(TaskFlowError::invalid_transition(
                "cannot cancel a running task",
            ));
        }
        self.store.update_status(id, TaskStatus::Cancelled).await?;
        if let Some(task) = self.store.get_task(id).await? {
            let _ = self.events_tx.send(TaskEvent::Cancelled(task));
        }
        Ok(())
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        self.store.update_status(id, TaskStatus::Paused).await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        self.store.update_status(id, TaskStatus::Pending).await?;
        self.notify.notify_one();
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.store.get_task(id).await
    }

    pub async fn get_session_tasks(
        &self,
        session_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        self.store.get_session_tasks(session_id, status).await
    }

    pub async fn get_stats(&self, session_id: Option<&str>) -> Result<QueueStats> {
        self.store.get_queue_stats(session_id).await
    }

    pub async fn update_priority(&self, id: &str, priority: Priority) -> Result<bool> {
        self.store.update_priority(id, priority).await
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Tasks found `running` at startup are stale from a crash; reset to
    /// `pending` with attempts unchanged (spec §3 crash-recovery rule, §8 P9).
    pub async fn recover_crashed_tasks(&self, session_ids: &[String]) -> Result<usize> {
        let mut recovered = 0;
        for sid in session_ids {
            let tasks = self
                .store
                .get_session_tasks(sid, Some(TaskStatus::Running))
                .await?;
            for task in tasks {
                self.store.update_status(&task.id, TaskStatus::Pending).await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            self.notify.notify_one();
        }
        Ok(recovered)
    }

    // ── Dispatch loop ────────────────────────────────────────

    /// Runs when signaled and on a 1s fallback tick (spec §4.3).
    async fn dispatch_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tick.tick() => {}
            }
            if let Err(e) = self.dispatch_once().await {
                tracing::warn!(error = %e, "dispatch cycle failed, will retry next tick");
            }
        }
    }

    async fn dispatch_once(&self) -> Result<()> {
        let free = {
            let running = self.running.lock().await;
            self.max_concurrent.saturating_sub(running.len())
        };
        if free == 0 {
            return Ok(());
        }
        let candidates = self.store.get_pending_dispatch(free).await?;
        for task in candidates {
            // `retry` tasks re-enter via `retry -> pending` before the only
            // legal `pending -> running` step (spec §3 transition table).
            if task.status == TaskStatus::Retry
                && self.store.update_status(&task.id, TaskStatus::Pending).await.is_err()
            {
                continue;
            }
            // Claim it: updateStatus(running). If this fails (already claimed
            // or an invalid-transition race), skip — someone else got it.
            if self
                .store
                .update_status(&task.id, TaskStatus::Running)
                .await
                .is_err()
            {
                continue;
            }
            self.running.lock().await.insert(task.id.clone());
            let mut running_task = task;
            running_task.status = TaskStatus::Running;
            self.pool.submit(running_task).await;
        }
        Ok(())
    }

    // ── Completion handling ──────────────────────────────────

    async fn collect_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<CompletedRun>) {
        while let Some(run) = rx.recv().await {
            if let Err(e) = self.handle_completed(run).await {
                tracing::error!(error = %e, "failed to record task completion");
            }
            self.notify.notify_one();
        }
    }

    async fn handle_completed(&self, run: CompletedRun) -> Result<()> {
        let CompletedRun { task, outcome } = run;
        self.running.lock().await.remove(&task.id);

        match outcome {
            RunOutcome::Success(result) => {
                self.store.increment_attempts(&task.id).await?;
                self.store
                    .update_result(&task.id, Some(&result.output), None)
                    .await?;
                if let Some(updated) = self.store.get_task(&task.id).await? {
                    let _ = self.events_tx.send(TaskEvent::Completed(updated));
                }
                // Follow-ups extracted by the AI Executor are the Task
                // Queue's responsibility to submit (spec §4.5).
                for prompt in result.follow_up_tasks {
                    let spec = NewTask::follow_up(&task, prompt);
                    if let Err(e) = self.submit(spec).await {
                        tracing::warn!(error = %e, task_id = %task.id, "failed to submit follow-up task");
                    }
                }
            }
            RunOutcome::Timeout => {
                self.fail_or_retry(&task, &format!("timeout after {}ms", task.timeout))
                    .await?;
            }
            RunOutcome::Error(err) => {
                self.fail_or_retry(&task, &err).await?;
            }
        }
        Ok(())
    }

    async fn fail_or_retry(&self, task: &Task, error: &str) -> Result<()> {
        let new_attempts = self.store.increment_attempts(&task.id).await?;
        if new_attempts < task.max_attempts {
            let delay = backoff_delay(task.retry_delay, new_attempts);
            self.store.schedule_retry(&task.id, delay).await?;
            if let Some(updated) = self.store.get_task(&task.id).await? {
                let _ = self.events_tx.send(TaskEvent::Retry(updated));
            }
        } else {
            self.store
                .update_result(&task.id, None, Some(error))
                .await?;
            if let Some(updated) = self.store.get_task(&task.id).await? {
                let _ = self.events_tx.send(TaskEvent::Failed(updated));
            }
        }
        Ok(())
    }
}
