//! `TaskStore` — unified persistence interface. The single source of truth;
//! every other component holds only transient caches rebuilt from here on
//! restart (spec §3 ownership rule).

use async_trait::async_trait;
use taskflow_core::error::Result;
use taskflow_core::types::{
    ExecutionRecord, MetricsSnapshot, NewTask, Priority, QueueStats, Task, TaskStatus,
    TransactionOp, Trigger,
};

/// Unified data store interface — implemented today by SQLite only; kept as
/// a trait so a second backend can be added later without touching callers
/// (mirrors `bizclaw-db::store::DataStore`).
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn name(&self) -> &str;

    /// Run idempotent schema migrations. Must be called once at startup.
    async fn migrate(&self) -> Result<()>;

    // ── Tasks ──────────────────────────────────────────────

    async fn create_task(&self, spec: NewTask) -> Result<Task>;

    /// All-or-nothing: either every task is created, or none are (spec §8 P8).
    async fn create_tasks_batch(&self, specs: Vec<NewTask>) -> Result<Vec<Task>>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Ordered by weighted priority score descending, then `created_at` ascending.
    async fn get_pending_dispatch(&self, limit: usize) -> Result<Vec<Task>>;

    /// Newest first, capped at 1000.
    async fn get_session_tasks(
        &self,
        session_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>>;

    /// All tasks currently in `status`, across every session. Used by startup
    /// crash recovery, which has no session id to scope by up front (spec §3).
    async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn update_status(&self, id: &str, new_status: TaskStatus) -> Result<()>;

    async fn update_result(&self, id: &str, output: Option<&str>, error: Option<&str>)
    -> Result<()>;

    /// Returns the new attempt count.
    async fn increment_attempts(&self, id: &str) -> Result<u32>;

    async fn schedule_retry(&self, id: &str, delay_ms: u64) -> Result<()>;

    /// Only applied if the task is currently `pending`.
    async fn update_priority(&self, id: &str, priority: Priority) -> Result<bool>;

    async fn update_tasks_batch(&self, ids: &[String], new_status: TaskStatus) -> Result<()>;

    /// Applies every op atomically: all commit, or none are applied (spec §4.1
    /// `transaction {begin, commit, rollback}`).
    async fn run_transaction(&self, ops: Vec<TransactionOp>) -> Result<()>;

    async fn get_queue_stats(&self, session_id: Option<&str>) -> Result<QueueStats>;

    /// Deletes `completed`/`failed` tasks older than the retention cutoff.
    /// Returns the number removed.
    async fn cleanup_old(&self, retention_days: u32) -> Result<u64>;

    // ── Triggers ───────────────────────────────────────────

    async fn create_trigger(&self, trigger: Trigger) -> Result<Trigger>;

    async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>>;

    async fn get_active_triggers(&self, session_id: Option<&str>) -> Result<Vec<Trigger>>;

    async fn set_trigger_active(&self, id: &str, active: bool) -> Result<()>;

    async fn mark_trigger_fired(&self, id: &str) -> Result<()>;

    // ── Execution history / metrics ─────────────────────────

    async fn record_execution(&self, record: ExecutionRecord) -> Result<()>;

    async fn record_metrics(&self, snapshot: MetricsSnapshot) -> Result<()>;
}
