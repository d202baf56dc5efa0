//! AI Executor wrapper: conversation history and follow-up extraction
//! layered over an injected model-call `Executor`.

pub mod ai_executor;
pub mod followup;
pub mod history;

pub use ai_executor::{AiExecutor, UsageStats};
