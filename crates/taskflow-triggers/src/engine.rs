//! Trigger Engine — converts events (cron ticks, webhooks, chained task
//! completions, manual calls) into new task submissions (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use taskflow_core::error::{Result, TaskFlowError};
use taskflow_core::types::{NewTask, Priority, Trigger, TriggerType};
use taskflow_queue::{TaskEvent, TaskQueue};
use taskflow_store::TaskStore;

use crate::cron::CronSchedule;
use crate::webhook::verify_signature;

/// Evaluates a condition-based trigger's free-form evaluator string. The
/// engine owns no interpretation of it; the host supplies the predicate.
pub type ConditionEvaluator = dyn Fn(&str, Option<&serde_json::Value>) -> bool + Send + Sync;

pub struct TriggerEngine {
    store: Arc<dyn TaskStore>,
    queue: Arc<TaskQueue>,
    /// Parsed CRON schedules keyed by trigger id — in-memory only, cleared on
    /// stop (spec §4.4 concurrency note).
    schedules: Mutex<HashMap<String, CronSchedule>>,
    condition_evaluator: Mutex<Option<Arc<ConditionEvaluator>>>,
}

impl TriggerEngine {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<TaskQueue>) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            schedules: Mutex::new(HashMap::new()),
            condition_evaluator: Mutex::new(None),
        })
    }

    pub async fn set_condition_evaluator(&self, evaluator: Arc<ConditionEvaluator>) {
        *self.condition_evaluator.lock().await = Some(evaluator);
    }

    /// Spawns the per-minute scheduler tick and the chain-trigger listener.
    /// Returns the same `Arc` for convenience chaining.
    pub fn spawn(self: &Arc<Self>, task_events: mpsc::UnboundedReceiver<TaskEvent>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.scheduler_loop().await });

        let listener = Arc::clone(self);
        tokio::spawn(async move { listener.chain_listener(task_events).await });
    }

    pub async fn create_trigger(&self, trigger: Trigger) -> Result<Trigger> {
        let created = self.store.create_trigger(trigger).await?;
        if created.trigger_type == TriggerType::Scheduled {
            if let Some(expr) = &created.schedule {
                let schedule = CronSchedule::parse(expr)
                    .map_err(|e| TaskFlowError::invalid_input(format!("bad cron expression: {e}")))?;
                self.schedules
                    .lock()
                    .await
                    .insert(created.id.clone(), schedule);
            }
        }
        Ok(created)
    }

    pub async fn get_active_triggers(&self, session_id: Option<&str>) -> Result<Vec<Trigger>> {
        self.store.get_active_triggers(session_id).await
    }

    /// Manual/API-invoked fire, and the common path used by the scheduler and
    /// chain listener once they've decided a trigger should go off.
    pub async fn fire(&self, trigger_id: &str) -> Result<()> {
        let trigger = self
            .store
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| TaskFlowError::not_found(format!("trigger {trigger_id}")))?;
        if !trigger.is_active {
            return Err(TaskFlowError::invalid_input("trigger is not active"));
        }
        self.fire_trigger(&trigger).await
    }

    /// Webhook callback entry point: validates the shared secret with a
    /// constant-time HMAC comparison before firing.
    pub async fn fire_webhook(&self, trigger_id: &str, payload: &[u8], signature: &str) -> Result<()> {
        let trigger = self
            .store
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| TaskFlowError::not_found(format!("trigger {trigger_id}")))?;
        if trigger.trigger_type != TriggerType::Webhook {
            return Err(TaskFlowError::invalid_input("not a webhook trigger"));
        }
        let secret = trigger
            .webhook_secret
            .as_deref()
            .ok_or_else(|| TaskFlowError::invalid_input("trigger has no webhook secret configured"))?;
        if !verify_signature(secret, payload, signature) {
            return Err(TaskFlowError::invalid_input("webhook signature mismatch"));
        }
        self.fire_trigger(&trigger).await
    }

    /// Re-scan every active condition-based trigger using the configured
    /// evaluator, firing those that currently hold true.
    pub async fn scan_conditions(&self, session_id: Option<&str>) -> Result<usize> {
        let Some(evaluator) = self.condition_evaluator.lock().await.clone() else {
            return Ok(0);
        };
        let triggers = self.store.get_active_triggers(session_id).await?;
        let mut fired = 0;
        for trigger in triggers {
            if trigger.trigger_type != TriggerType::ConditionBased {
                continue;
            }
            let Some(evaluator_str) = &trigger.condition_type else {
                continue;
            };
            if evaluator(evaluator_str, trigger.condition_data.as_ref()) {
                self.fire_trigger(&trigger).await?;
                fired += 1;
            }
        }
        Ok(fired)
    }

    /// Fire semantics common to every trigger kind (spec §4.4): re-enqueue
    /// `target_task_id` via `triggered_by`, or instantiate `task_template`.
    async fn fire_trigger(&self, trigger: &Trigger) -> Result<()> {
        let spec = if let Some(target_id) = &trigger.target_task_id {
            let target = self
                .store
                .get_task(target_id)
                .await?
                .ok_or_else(|| TaskFlowError::not_found(format!("task {target_id}")))?;
            NewTask {
                session_id: target.session_id,
                prompt: target.prompt,
                mode: target.mode,
                model: target.model,
                priority: target.priority,
                max_attempts: target.max_attempts,
                retry_delay: target.retry_delay,
                timeout: target.timeout,
                scheduled_for: None,
                recurring_rule: target.recurring_rule,
                expires_at: None,
                triggered_by: Some(trigger.id.clone()),
                workflow_id: target.workflow_id,
                tags: target.tags,
                metadata: target.metadata,
            }
        } else if let Some(template) = &trigger.task_template {
            NewTask {
                session_id: template.session_id.clone(),
                prompt: template.prompt.clone(),
                mode: template.mode,
                model: template.model.clone(),
                priority: template.priority.unwrap_or(Priority::Normal),
                max_attempts: template.max_attempts,
                retry_delay: template.retry_delay,
                timeout: template.timeout,
                scheduled_for: None,
                recurring_rule: None,
                expires_at: None,
                triggered_by: Some(trigger.id.clone()),
                workflow_id: None,
                tags: template.tags.clone(),
                metadata: template.metadata.clone(),
            }
        } else {
            return Err(TaskFlowError::invalid_input(
                "trigger has neither target_task_id nor task_template",
            ));
        };

        self.queue.submit(spec).await?;
        self.store.mark_trigger_fired(&trigger.id).await?;
        Ok(())
    }

    /// Checks every active `scheduled` trigger once per minute against its
    /// parsed CRON expression, and every active `time-based` trigger against
    /// its fixed periodic delay.
    async fn scheduler_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            if let Err(e) = self.scheduler_tick().await {
                tracing::warn!(error = %e, "trigger scheduler tick failed");
            }
        }
    }

    async fn scheduler_tick(&self) -> Result<()> {
        let triggers = self.store.get_active_triggers(None).await?;
        let now = chrono::Utc::now();
        for trigger in triggers {
            match trigger.trigger_type {
                TriggerType::Scheduled => {
                    let Some(expr) = &trigger.schedule else { continue };
                    let mut schedules = self.schedules.lock().await;
                    let schedule = match schedules.get(&trigger.id) {
                        Some(s) => s.clone(),
                        None => match CronSchedule::parse(expr) {
                            Ok(s) => {
                                schedules.insert(trigger.id.clone(), s.clone());
                                s
                            }
                            Err(e) => {
                                tracing::warn!(trigger_id = %trigger.id, error = %e, "invalid cron expression");
                                continue;
                            }
                        },
                    };
                    drop(schedules);
                    if schedule.matches(&now) {
                        self.fire_trigger(&trigger).await?;
                    }
                }
                TriggerType::TimeBased => {
                    let Some(raw) = &trigger.schedule else { continue };
                    let Ok(delay_ms) = raw.parse::<i64>() else { continue };
                    let due = match trigger.last_triggered_at {
                        Some(last) => now - last >= chrono::Duration::milliseconds(delay_ms),
                        None => true,
                    };
                    if due {
                        self.fire_trigger(&trigger).await?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Listens for `task:completed` events and fires any active `chain`
    /// trigger whose `target_task_id` matches the completed task.
    async fn chain_listener(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<TaskEvent>) {
        while let Some(event) = rx.recv().await {
            let TaskEvent::Completed(task) = event else {
                continue;
            };
            let triggers = match self.store.get_active_triggers(None).await {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load triggers for chain dispatch");
                    continue;
                }
            };
            for trigger in triggers {
                if trigger.trigger_type == TriggerType::Chain
                    && trigger.target_task_id.as_deref() == Some(task.id.as_str())
                    && let Err(e) = self.fire_trigger(&trigger).await
                {
                    tracing::warn!(trigger_id = %trigger.id, error = %e, "chain trigger fire failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskflow_core::traits::{ExecutionContext, ExecutionOutcome, Executor};
    use taskflow_core::types::TaskMode;
    use taskflow_store::SqliteStore;

    struct Noop;
    #[async_trait]
    impl Executor for Noop {
        async fn execute(&self, _ctx: ExecutionContext) -> ExecutionOutcome {
            ExecutionOutcome::ok("ok")
        }
    }

    async fn new_engine() -> (Arc<TaskQueue>, Arc<TriggerEngine>) {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteStore::in_memory().unwrap());
        store.migrate().await.unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue = TaskQueue::new(Arc::clone(&store), 4, 4, events_tx);
        queue.set_executor(Arc::new(Noop)).await;
        let engine = TriggerEngine::new(store, Arc::clone(&queue));
        engine.spawn(events_rx);
        (queue, engine)
    }

    fn template_trigger(name: &str, session_id: &str) -> Trigger {
        Trigger {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            trigger_type: TriggerType::Manual,
            name: name.to_string(),
            description: None,
            target_task_id: None,
            task_template: Some(taskflow_core::types::TaskTemplate {
                session_id: session_id.to_string(),
                prompt: "say hi".into(),
                mode: TaskMode::General,
                model: "gpt".into(),
                priority: Some(Priority::High),
                max_attempts: 3,
                retry_delay: 1000,
                timeout: 5000,
                tags: vec![],
                metadata: serde_json::Value::Null,
            }),
            condition_type: None,
            condition_data: None,
            schedule: None,
            webhook_url: None,
            webhook_secret: None,
            is_active: true,
            last_triggered_at: None,
            metadata: serde_json::Value::Null,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_manual_fire_creates_task_from_template() {
        let (queue, engine) = new_engine().await;
        let trigger = engine.create_trigger(template_trigger("t1", "s1")).await.unwrap();
        engine.fire(&trigger.id).await.unwrap();

        let tasks = queue.get_session_tasks("s1", None).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].triggered_by.as_deref(), Some(trigger.id.as_str()));
        assert_eq!(tasks[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn test_fire_rejects_inactive_trigger() {
        let (_queue, engine) = new_engine().await;
        let mut t = template_trigger("t2", "s2");
        t.is_active = false;
        let trigger = engine.create_trigger(t).await.unwrap();
        let err = engine.fire(&trigger.id).await.unwrap_err();
        assert!(matches!(err, TaskFlowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_webhook_requires_valid_signature() {
        let (_queue, engine) = new_engine().await;
        let mut t = template_trigger("t3", "s3");
        t.trigger_type = TriggerType::Webhook;
        t.webhook_secret = Some("secret".into());
        let trigger = engine.create_trigger(t).await.unwrap();

        let err = engine
            .fire_webhook(&trigger.id, b"payload", "deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFlowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_target_task_reference_does_not_mutate_original() {
        let (queue, engine) = new_engine().await;
        let original = queue
            .submit(NewTask {
                session_id: "s4".into(),
                prompt: "original".into(),
                mode: TaskMode::General,
                model: "gpt".into(),
                priority: Priority::Normal,
                max_attempts: 3,
                retry_delay: 1000,
                timeout: 5000,
                scheduled_for: None,
                recurring_rule: None,
                expires_at: None,
                triggered_by: None,
                workflow_id: None,
                tags: vec![],
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let mut t = template_trigger("t4", "s4");
        t.task_template = None;
        t.target_task_id = Some(original.id.clone());
        let trigger = engine.create_trigger(t).await.unwrap();
        engine.fire(&trigger.id).await.unwrap();

        let tasks = queue.get_session_tasks("s4", None).await.unwrap();
        assert_eq!(tasks.len(), 2);
        let reoriginal = tasks.iter().find(|t| t.id == original.id).unwrap();
        assert_eq!(reoriginal.prompt, "original");
        let spawned = tasks.iter().find(|t| t.id != original.id).unwrap();
        assert_eq!(spawned.triggered_by.as_deref(), Some(trigger.id.as_str()));
    }
}
