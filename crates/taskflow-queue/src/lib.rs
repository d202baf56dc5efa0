//! Worker pool and task-lifecycle dispatch.

pub mod pool;
pub mod queue;

pub use pool::{CompletedRun, PoolStats, RunOutcome, WorkerPool};
pub use queue::{TaskEvent, TaskQueue, backoff_delay};
