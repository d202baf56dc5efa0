//! Converts events (cron ticks, webhooks, chained completions, manual calls)
//! into task submissions.

pub mod cron;
pub mod engine;
pub mod webhook;

pub use cron::CronSchedule;
pub use engine::{ConditionEvaluator, TriggerEngine};
