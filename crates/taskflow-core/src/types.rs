//! Domain types — Task, Trigger, Workflow, execution history, metrics snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Task ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retry,
    Paused,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retry => "retry",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "scheduled" => Self::Scheduled,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "retry" => Self::Retry,
            "paused" => Self::Paused,
            other => return Err(format!("unknown task status: {other}")),
        })
    }
}

impl TaskStatus {
    /// Whether `self -> next` is one of the allowed transitions from spec §3.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Retry)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Paused, Cancelled)
                | (Pending, Paused)
                | (Paused, Pending)
                | (Retry, Pending)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Base score used by the weighted-priority dispatch formula in spec §4.1.
    pub fn base_score(&self) -> i64 {
        match self {
            Self::Critical => 100,
            Self::High => 75,
            Self::Normal => 50,
            Self::Low => 25,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "critical" => Self::Critical,
            "high" => Self::High,
            "normal" => Self::Normal,
            "low" => Self::Low,
            other => return Err(format!("unknown priority: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskMode {
    General,
    Coder,
    IntenseResearch,
    Spark,
}

impl Default for TaskMode {
    fn default() -> Self {
        Self::General
    }
}

/// A unit of AI-executable work with its own retry budget and timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub session_id: String,

    pub prompt: String,
    pub mode: TaskMode,
    pub model: String,

    pub status: TaskStatus,
    pub priority: Priority,

    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub retry_delay: u64,
    pub timeout: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recurring_rule: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,

    pub triggered_by: Option<String>,
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub output: Option<String>,
    pub error: Option<String>,
    pub error_stack: Option<String>,
}

/// Fields needed to create a new task. Separate from `Task` so the store can
/// assign id/timestamps on insert (mirrors `AgentLink::new` taking only the
/// caller-supplied fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub recurring_rule: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_model() -> String {
    "default".to_string()
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_retry_delay() -> u64 {
    1_000
}

pub fn default_timeout() -> u64 {
    30_000
}

impl Task {
    /// Build a new pending task from a `NewTask` spec, stamping id/timestamps.
    pub fn from_new(spec: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: spec.session_id,
            prompt: spec.prompt,
            mode: spec.mode,
            model: spec.model,
            status: TaskStatus::Pending,
            priority: spec.priority,
            attempts: 0,
            max_attempts: spec.max_attempts,
            last_attempt_at: None,
            retry_delay: spec.retry_delay,
            timeout: spec.timeout,
            created_at: now,
            updated_at: now,
            scheduled_for: spec.scheduled_for,
            completed_at: None,
            recurring_rule: spec.recurring_rule,
            expires_at: spec.expires_at,
            triggered_by: spec.triggered_by,
            workflow_id: spec.workflow_id,
            tags: spec.tags,
            metadata: spec.metadata,
            output: None,
            error: None,
            error_stack: None,
        }
    }

    /// Weighted dispatch score: `base(priority) + min(age_minutes, 50)`.
    pub fn dispatch_score(&self, now: DateTime<Utc>) -> i64 {
        let age_ms = (now - self.created_at).num_milliseconds().max(0);
        let age_minutes = (age_ms / 60_000).min(50);
        self.priority.base_score() + age_minutes
    }

    /// Eligible for dispatch iff pending/retry and not scheduled for the future.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Retry)
            && self.scheduled_for.is_none_or(|t| t <= now)
    }
}

impl NewTask {
    /// Derive a follow-up task from its parent: same session/mode/model,
    /// default priority and retry policy, `triggered_by` pointing back at the
    /// parent (spec §4.5 — "the Task Queue is responsible for submitting them").
    pub fn follow_up(parent: &Task, prompt: String) -> Self {
        Self {
            session_id: parent.session_id.clone(),
            prompt,
            mode: parent.mode,
            model: parent.model.clone(),
            priority: Priority::default(),
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            timeout: default_timeout(),
            scheduled_for: None,
            recurring_rule: None,
            expires_at: None,
            triggered_by: Some(parent.id.clone()),
            workflow_id: parent.workflow_id.clone(),
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }
}

// ── Trigger ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Webhook,
    AiGenerated,
    ConditionBased,
    Chain,
    TimeBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default = "default_model")]
    pub model: String,
    pub priority: Option<Priority>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// An event-to-task producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub session_id: String,
    pub trigger_type: TriggerType,
    pub name: String,
    pub description: Option<String>,

    pub target_task_id: Option<String>,
    pub task_template: Option<TaskTemplate>,

    pub condition_type: Option<String>,
    pub condition_data: Option<serde_json::Value>,

    pub schedule: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,

    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Exactly one of `target_task_id`/`task_template` must be set (spec §3 invariant).
    pub fn is_valid(&self) -> bool {
        self.target_task_id.is_some() != self.task_template.is_some()
    }
}

// ── Workflow ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A named group of tasks sharing a retry policy. Metadata-only — the core
/// engine treats it as a tag, not a schedulable unit (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub trigger_ids: Vec<String>,
    pub max_concurrent: Option<u32>,
    pub timeout: Option<u64>,
    pub retry_policy: Option<serde_json::Value>,
    pub status: WorkflowStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Execution history ──────────────────────────────────────

/// Append-only record of one dispatch attempt. Used by metrics only, never
/// read back into task state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub execution_time: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ── Transactions ───────────────────────────────────────────

/// One step of an atomic batch passed to `TaskStore::run_transaction`,
/// exposing spec §4.1's `transaction {begin, commit, rollback}` operation to
/// callers directly rather than only internally inside the batch methods.
#[derive(Debug, Clone)]
pub enum TransactionOp {
    CreateTask(NewTask),
    UpdateStatus { id: String, status: TaskStatus },
}

// ── Queue stats / metrics snapshot ─────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub retry_tasks: u64,
    pub cancelled_tasks: u64,
    pub paused_tasks: u64,
    pub avg_attempts: f64,
}

/// Timestamped sample of totals, averages, worker utilization, memory footprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub avg_execution_time: f64,
    pub success_rate: f64,
    pub active_workers: u32,
    pub queue_depth: u64,
    pub memory_used: Option<u64>,
    pub memory_total: Option<u64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Retry));
        assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Cancelled));
        assert!(TaskStatus::Paused.can_transition_to(&TaskStatus::Cancelled));
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Paused));
        assert!(TaskStatus::Paused.can_transition_to(&TaskStatus::Pending));
        assert!(TaskStatus::Retry.can_transition_to(&TaskStatus::Pending));

        assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Running));
        assert!(!TaskStatus::Running.can_transition_to(&TaskStatus::Paused));
    }

    #[test]
    fn test_priority_base_scores() {
        assert_eq!(Priority::Critical.base_score(), 100);
        assert_eq!(Priority::High.base_score(), 75);
        assert_eq!(Priority::Normal.base_score(), 50);
        assert_eq!(Priority::Low.base_score(), 25);
    }

    #[test]
    fn test_dispatch_score_aging() {
        let now = Utc::now();
        let mut task = Task::from_new(NewTask {
            session_id: "s".into(),
            prompt: "p".into(),
            mode: TaskMode::General,
            model: "m".into(),
            priority: Priority::Normal,
            max_attempts: 3,
            retry_delay: 1000,
            timeout: 30_000,
            scheduled_for: None,
            recurring_rule: None,
            expires_at: None,
            triggered_by: None,
            workflow_id: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
        });
        task.created_at = now - chrono::Duration::minutes(50);
        assert_eq!(task.dispatch_score(now), 100);

        let critical = Task::from_new(NewTask {
            session_id: "s".into(),
            prompt: "p".into(),
            mode: TaskMode::General,
            model: "m".into(),
            priority: Priority::Critical,
            max_attempts: 3,
            retry_delay: 1000,
            timeout: 30_000,
            scheduled_for: None,
            recurring_rule: None,
            expires_at: None,
            triggered_by: None,
            workflow_id: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
        });
        assert_eq!(critical.dispatch_score(now), 100);
    }

    #[test]
    fn test_task_eligibility() {
        let now = Utc::now();
        let mut task = Task::from_new(NewTask {
            session_id: "s".into(),
            prompt: "p".into(),
            mode: TaskMode::General,
            model: "m".into(),
            priority: Priority::Normal,
            max_attempts: 3,
            retry_delay: 1000,
            timeout: 30_000,
            scheduled_for: None,
            recurring_rule: None,
            expires_at: None,
            triggered_by: None,
            workflow_id: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
        });
        assert!(task.is_eligible(now));

        task.scheduled_for = Some(now + chrono::Duration::seconds(60));
        assert!(!task.is_eligible(now));

        task.status = TaskStatus::Running;
        task.scheduled_for = None;
        assert!(!task.is_eligible(now));
    }

    #[test]
    fn test_trigger_validity() {
        let base = Trigger {
            id: "t".into(),
            session_id: "s".into(),
            trigger_type: TriggerType::Manual,
            name: "n".into(),
            description: None,
            target_task_id: None,
            task_template: None,
            condition_type: None,
            condition_data: None,
            schedule: None,
            webhook_url: None,
            webhook_secret: None,
            is_active: true,
            last_triggered_at: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(!base.is_valid());

        let mut with_target = base.clone();
        with_target.target_task_id = Some("x".into());
        assert!(with_target.is_valid());

        let mut both = with_target.clone();
        both.task_template = Some(TaskTemplate {
            session_id: "s".into(),
            prompt: "p".into(),
            mode: TaskMode::General,
            model: "m".into(),
            priority: None,
            max_attempts: 3,
            retry_delay: 1000,
            timeout: 30_000,
            tags: vec![],
            metadata: serde_json::Value::Null,
        });
        assert!(!both.is_valid());
    }

    #[test]
    fn test_backward_compatible_deserialize() {
        let json = serde_json::json!({
            "session_id": "s1",
            "prompt": "hello",
        });
        let spec: NewTask = serde_json::from_value(json).unwrap();
        assert_eq!(spec.priority, Priority::Normal);
        assert_eq!(spec.max_attempts, 3);
        assert_eq!(spec.retry_delay, 1000);
        assert_eq!(spec.timeout, 30_000);
    }
}
