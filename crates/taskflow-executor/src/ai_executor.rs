//! `AiExecutor` — wraps an injected model-call `Executor`, adding rolling
//! conversation history and follow-up extraction on top of it. Shaped like a
//! minimal `bizclaw-agent::Agent`: a per-session history store plus a
//! `Provider`-like callable resolved once at construction (spec §4.5).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use taskflow_core::traits::{ExecutionContext, ExecutionOutcome, Executor};

use crate::followup::extract_follow_ups;
use crate::history::ConversationHistories;

#[derive(Debug, Default, Clone, Copy)]
pub struct UsageStats {
    pub executions: u64,
    pub tokens_used: u64,
}

struct UsageCounters {
    executions: AtomicU64,
    tokens_used: AtomicU64,
}

/// The injected model call, plus the bookkeeping the spec layers on top of it.
pub struct AiExecutor {
    inner: Arc<dyn Executor>,
    histories: ConversationHistories,
    usage: UsageCounters,
}

impl AiExecutor {
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self {
            inner,
            histories: ConversationHistories::new(),
            usage: UsageCounters {
                executions: AtomicU64::new(0),
                tokens_used: AtomicU64::new(0),
            },
        }
    }

    pub fn usage(&self) -> UsageStats {
        UsageStats {
            executions: self.usage.executions.load(Ordering::Relaxed),
            tokens_used: self.usage.tokens_used.load(Ordering::Relaxed),
        }
    }

    pub async fn clear_history(&self, session_id: &str) {
        self.histories.clear(session_id).await;
    }
}

#[async_trait]
impl Executor for AiExecutor {
    async fn execute(&self, context: ExecutionContext) -> ExecutionOutcome {
        self.histories
            .push_user(&context.session_id, context.prompt.clone())
            .await;

        let mut outcome = self.inner.execute(context.clone()).await;

        self.usage.executions.fetch_add(1, Ordering::Relaxed);
        if let Some(tokens) = outcome.tokens_used {
            self.usage.tokens_used.fetch_add(tokens, Ordering::Relaxed);
        }

        if outcome.success {
            self.histories
                .push_assistant(&context.session_id, outcome.output.clone())
                .await;
            let extracted = extract_follow_ups(&outcome.output);
            outcome.follow_up_tasks.extend(extracted);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::types::TaskMode;

    struct StubExecutor;

    #[async_trait]
    impl Executor for StubExecutor {
        async fn execute(&self, context: ExecutionContext) -> ExecutionOutcome {
            let mut outcome = ExecutionOutcome::ok(format!(
                "handled: {}\nNext step: clean up the workspace",
                context.prompt
            ));
            outcome.tokens_used = Some(42);
            outcome
        }
    }

    fn ctx(session_id: &str, prompt: &str) -> ExecutionContext {
        ExecutionContext {
            task_id: "t1".into(),
            session_id: session_id.into(),
            prompt: prompt.into(),
            mode: TaskMode::General,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_extracts_follow_up_from_successful_output() {
        let exec = AiExecutor::new(Arc::new(StubExecutor));
        let outcome = exec.execute(ctx("s1", "do the thing")).await;
        assert!(outcome.success);
        assert_eq!(outcome.follow_up_tasks, vec!["clean up the workspace".to_string()]);
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_calls() {
        let exec = AiExecutor::new(Arc::new(StubExecutor));
        exec.execute(ctx("s1", "one")).await;
        exec.execute(ctx("s1", "two")).await;
        let usage = exec.usage();
        assert_eq!(usage.executions, 2);
        assert_eq!(usage.tokens_used, 84);
    }

    #[tokio::test]
    async fn test_history_records_user_then_assistant() {
        let exec = AiExecutor::new(Arc::new(StubExecutor));
        exec.execute(ctx("s1", "hello")).await;
        let history = exec.histories.get("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert!(history[1].content.starts_with("handled: hello"));
    }
}
