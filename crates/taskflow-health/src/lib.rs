//! Periodic health sampling: store latency, queue aging, worker staleness,
//! process memory — status and a 0-100 score.

pub mod mem;
pub mod monitor;

pub use monitor::{HealthMonitor, HealthSnapshot, HealthStatus};
