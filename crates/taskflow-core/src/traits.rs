//! `Executor` — the injected AI-model callable (out of scope per spec §1:
//! "the AI model call itself" is treated as an opaque function). Shaped like
//! `bizclaw-core::traits::provider::Provider`: a trait object resolved once
//! and held behind an `Arc`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::TaskMode;

/// Everything the executor needs to run one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub task_id: String,
    pub session_id: String,
    pub prompt: String,
    pub mode: TaskMode,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of one execution attempt, per spec §4.5's
/// `{success, output, tokensUsed?, followUpTasks?, error?}` contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub follow_up_tasks: Vec<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// The injected executor callable — every backend (AI model, stub, test
/// double) implements this. Kept as `Arc<dyn Executor>` by the queue and the
/// AI Executor wrapper, never called directly by the Store or HTTP surface.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, context: ExecutionContext) -> ExecutionOutcome;
}
