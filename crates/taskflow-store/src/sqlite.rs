//! SQLite-backed `TaskStore` — zero-config, file-based persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use taskflow_core::error::{Result, TaskFlowError};
use taskflow_core::types::{
    ExecutionRecord, MetricsSnapshot, NewTask, Priority, QueueStats, Task, TaskMode, TaskStatus,
    TransactionOp, Trigger, TriggerType,
};

use crate::store::TaskStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, setting WAL mode and foreign keys.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| TaskFlowError::Fatal(format!("SQLite open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| TaskFlowError::Fatal(format!("SQLite pragma: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TaskFlowError::Fatal(format!("SQLite in-memory: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| TaskFlowError::Fatal(format!("SQLite pragma: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn migrate(&self) -> Result<()> {
        let conn = self.db();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                prompt TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'general',
                model TEXT NOT NULL DEFAULT 'default',
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'normal',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                last_attempt_at TEXT,
                completed_at TEXT,
                result TEXT,
                error TEXT,
                error_stack TEXT,
                triggered_by TEXT,
                retry_delay INTEGER NOT NULL DEFAULT 1000,
                timeout INTEGER NOT NULL DEFAULT 30000,
                scheduled_for TEXT,
                recurring_rule TEXT,
                workflow_id TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                tags_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                expires_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_dispatch ON tasks(status, priority, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_scheduled ON tasks(scheduled_for);
            CREATE INDEX IF NOT EXISTS idx_tasks_created_desc ON tasks(created_at DESC);

            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                target_task_id TEXT,
                task_template_json TEXT,
                condition_type TEXT,
                condition_data_json TEXT,
                schedule TEXT,
                webhook_url TEXT,
                webhook_secret TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_triggered_at TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_triggers_session ON triggers(session_id);
            CREATE INDEX IF NOT EXISTS idx_triggers_active ON triggers(is_active);

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                task_ids_json TEXT NOT NULL DEFAULT '[]',
                trigger_ids_json TEXT NOT NULL DEFAULT '[]',
                max_concurrent INTEGER,
                timeout INTEGER,
                retry_policy_json TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                completed_at TEXT,
                total_duration INTEGER,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE TABLE IF NOT EXISTS task_dependencies (
                id TEXT PRIMARY KEY,
                from_task_id TEXT NOT NULL,
                to_task_id TEXT NOT NULL,
                dependency_type TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE TABLE IF NOT EXISTS execution_history (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                execution_time INTEGER,
                input_tokens INTEGER,
                output_tokens INTEGER,
                total_tokens INTEGER,
                error TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_exec_task ON execution_history(task_id);

            CREATE TABLE IF NOT EXISTS metrics (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                total_tasks INTEGER NOT NULL DEFAULT 0,
                pending_tasks INTEGER NOT NULL DEFAULT 0,
                running_tasks INTEGER NOT NULL DEFAULT 0,
                completed_tasks INTEGER NOT NULL DEFAULT 0,
                failed_tasks INTEGER NOT NULL DEFAULT 0,
                avg_execution_time REAL NOT NULL DEFAULT 0,
                success_rate REAL NOT NULL DEFAULT 0,
                active_workers INTEGER NOT NULL DEFAULT 0,
                queue_depth INTEGER NOT NULL DEFAULT 0,
                memory_used INTEGER,
                memory_total INTEGER,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            ",
        )
        .map_err(|e| TaskFlowError::Fatal(format!("migration error: {e}")))?;
        tracing::info!("sqlite schema migrated");
        Ok(())
    }

    // ── Tasks ──────────────────────────────────────────────

    async fn create_task(&self, spec: NewTask) -> Result<Task> {
        if spec.session_id.is_empty() {
            return Err(TaskFlowError::invalid_input("session_id is required"));
        }
        if spec.prompt.is_empty() {
            return Err(TaskFlowError::invalid_input("prompt is required"));
        }
        let task = Task::from_new(spec);
        let conn = self.db();
        insert_task(&conn, &task)?;
        tracing::debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    async fn create_tasks_batch(&self, specs: Vec<NewTask>) -> Result<Vec<Task>> {
        for spec in &specs {
            if spec.session_id.is_empty() || spec.prompt.is_empty() {
                return Err(TaskFlowError::invalid_input(
                    "session_id and prompt are required for every task in a batch",
                ));
            }
        }
        let tasks: Vec<Task> = specs.into_iter().map(Task::from_new).collect();
        let mut conn = self.db();
        let tx = conn
            .transaction()
            .map_err(|e| TaskFlowError::store(format!("begin batch: {e}")))?;
        for task in &tasks {
            insert_task(&tx, task)?;
        }
        tx.commit()
            .map_err(|e| TaskFlowError::store(format!("commit batch: {e}")))?;
        tracing::info!(count = tasks.len(), "task batch created");
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.db();
        conn.query_row(&format!("{TASK_COLUMNS} WHERE id = ?1"), params![id], |r| {
            task_from_row(r)
        })
        .optional()
        .map_err(|e| TaskFlowError::store(format!("get_task: {e}")))
    }

    async fn get_pending_dispatch(&self, limit: usize) -> Result<Vec<Task>> {
        let conn = self.db();
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_COLUMNS} WHERE status IN ('pending','retry')
                 AND (scheduled_for IS NULL OR scheduled_for <= ?1)"
            ))
            .map_err(|e| TaskFlowError::store(format!("prepare dispatch query: {e}")))?;
        let now = Utc::now();
        let rows = stmt
            .query_map(params![now.to_rfc3339()], |r| task_from_row(r))
            .map_err(|e| TaskFlowError::store(format!("dispatch query: {e}")))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| TaskFlowError::store(format!("row: {e}")))?);
        }
        // Weighted score descending, then created_at ascending — done in Rust
        // since the score depends on "now", not a stored column.
        tasks.sort_by(|a, b| {
            let sa = a.dispatch_score(now);
            let sb = b.dispatch_score(now);
            sb.cmp(&sa).then(a.created_at.cmp(&b.created_at))
        });
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn get_session_tasks(
        &self,
        session_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let conn = self.db();
        let (sql, status_str);
        if let Some(s) = status {
            status_str = s.to_string();
            sql = format!(
                "{TASK_COLUMNS} WHERE session_id = ?1 AND status = ?2 ORDER BY created_at DESC LIMIT 1000"
            );
        } else {
            status_str = String::new();
            sql = format!("{TASK_COLUMNS} WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1000");
        }
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TaskFlowError::store(format!("prepare session query: {e}")))?;
        let rows = if status_str.is_empty() {
            stmt.query_map(params![session_id], |r| task_from_row(r))
        } else {
            stmt.query_map(params![session_id, status_str], |r| task_from_row(r))
        }
        .map_err(|e| TaskFlowError::store(format!("session query: {e}")))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| TaskFlowError::store(format!("row: {e}")))?);
        }
        Ok(tasks)
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let conn = self.db();
        let mut stmt = stmt_err(conn.prepare(&format!("{TASK_COLUMNS} WHERE status = ?1")))?;
        let rows = stmt_err(stmt.query_map(params![status.to_string()], |r| task_from_row(r)))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| TaskFlowError::store(format!("row: {e}")))?);
        }
        Ok(tasks)
    }

    async fn update_status(&self, id: &str, new_status: TaskStatus) -> Result<()> {
        let conn = self.db();
        let current = conn
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1",
                params![id],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| TaskFlowError::store(format!("read status: {e}")))?
            .ok_or_else(|| TaskFlowError::not_found(format!("task {id}")))?;
        let current_status = TaskStatus::from_str(&current)
            .map_err(|e| TaskFlowError::store(format!("corrupt status: {e}")))?;
        if !current_status.can_transition_to(&new_status) {
            return Err(TaskFlowError::invalid_transition(format!(
                "{current_status} -> {new_status}"
            )));
        }
        let now = Utc::now().to_rfc3339();
        match new_status {
            TaskStatus::Running => {
                conn.execute(
                    "UPDATE tasks SET status = ?1, updated_at = ?2, last_attempt_at = ?2 WHERE id = ?3",
                    params![new_status.to_string(), now, id],
                )
            }
            TaskStatus::Completed | TaskStatus::Failed => conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2, completed_at = ?2 WHERE id = ?3",
                params![new_status.to_string(), now, id],
            ),
            _ => conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_status.to_string(), now, id],
            ),
        }
        .map_err(|e| TaskFlowError::store(format!("update_status: {e}")))?;
        Ok(())
    }

    async fn update_result(
        &self,
        id: &str,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.db();
        let status = if error.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        let now = Utc::now().to_rfc3339();
        let n = conn
            .execute(
                "UPDATE tasks SET status = ?1, result = ?2, error = ?3, completed_at = ?4, updated_at = ?4 WHERE id = ?5",
                params![status.to_string(), output, error, now, id],
            )
            .map_err(|e| TaskFlowError::store(format!("update_result: {e}")))?;
        if n == 0 {
            return Err(TaskFlowError::not_found(format!("task {id}")));
        }
        Ok(())
    }

    async fn increment_attempts(&self, id: &str) -> Result<u32> {
        let conn = self.db();
        conn.execute(
            "UPDATE tasks SET attempts = attempts + 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| TaskFlowError::store(format!("increment_attempts: {e}")))?;
        conn.query_row(
            "SELECT attempts FROM tasks WHERE id = ?1",
            params![id],
            |r| r.get::<_, i64>(0),
        )
        .map(|n| n as u32)
        .map_err(|e| TaskFlowError::not_found(format!("task {id}: {e}")))
    }

    async fn schedule_retry(&self, id: &str, delay_ms: u64) -> Result<()> {
        let conn = self.db();
        let now = Utc::now();
        let scheduled_for = now + chrono::Duration::milliseconds(delay_ms as i64);
        conn.execute(
            "UPDATE tasks SET status = 'retry', scheduled_for = ?1, retry_delay = ?2, updated_at = ?3 WHERE id = ?4",
            params![scheduled_for.to_rfc3339(), delay_ms as i64, now.to_rfc3339(), id],
        )
        .map_err(|e| TaskFlowError::store(format!("schedule_retry: {e}")))?;
        Ok(())
    }

    async fn update_priority(&self, id: &str, priority: Priority) -> Result<bool> {
        let conn = self.db();
        let priority_str = serde_json::to_string(&priority)
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        let n = conn
            .execute(
                "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
                params![priority_str, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| TaskFlowError::store(format!("update_priority: {e}")))?;
        Ok(n > 0)
    }

    async fn update_tasks_batch(&self, ids: &[String], new_status: TaskStatus) -> Result<()> {
        let mut conn = self.db();
        let tx = conn
            .transaction()
            .map_err(|e| TaskFlowError::store(format!("begin batch update: {e}")))?;
        let now = Utc::now().to_rfc3339();
        for id in ids {
            tx.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_status.to_string(), now, id],
            )
            .map_err(|e| TaskFlowError::store(format!("batch update: {e}")))?;
        }
        tx.commit()
            .map_err(|e| TaskFlowError::store(format!("commit batch update: {e}")))?;
        Ok(())
    }

    async fn run_transaction(&self, ops: Vec<TransactionOp>) -> Result<()> {
        let mut conn = self.db();
        let tx = conn
            .transaction()
            .map_err(|e| TaskFlowError::store(format!("begin transaction: {e}")))?;
        for op in ops {
            match op {
                TransactionOp::CreateTask(spec) => {
                    let task = Task::from_new(spec);
                    insert_task(&tx, &task)?;
                }
                TransactionOp::UpdateStatus { id, status } => {
                    tx.execute(
                        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                        params![status.to_string(), Utc::now().to_rfc3339(), id],
                    )
                    .map_err(|e| TaskFlowError::store(format!("transaction update_status: {e}")))?;
                }
            }
        }
        tx.commit()
            .map_err(|e| TaskFlowError::store(format!("commit transaction: {e}")))?;
        Ok(())
    }

    async fn get_queue_stats(&self, session_id: Option<&str>) -> Result<QueueStats> {
        let conn = self.db();
        let (where_clause, bind): (&str, Vec<&dyn rusqlite::ToSql>) = if let Some(sid) = session_id
        {
            ("WHERE session_id = ?1", vec![&sid])
        } else {
            ("", vec![])
        };
        let sql = format!(
            "SELECT status, COUNT(*), AVG(attempts) FROM tasks {where_clause} GROUP BY status"
        );
        let mut stmt = stmt_err(conn.prepare(&sql))?;
        let mut stats = QueueStats::default();
        let mut total_attempts = 0.0;
        let mut groups = 0.0;
        let mut rows = stmt_err(stmt.query(bind.as_slice()))?;
        while let Some(row) = stmt_err(rows.next())? {
            let status: String = stmt_err(row.get(0))?;
            let count: i64 = stmt_err(row.get(1))?;
            let avg_attempts: f64 = row.get(2).unwrap_or(0.0);
            stats.total_tasks += count as u64;
            total_attempts += avg_attempts * count as f64;
            groups += count as f64;
            match status.as_str() {
                "pending" => stats.pending_tasks = count as u64,
                "running" => stats.running_tasks = count as u64,
                "completed" => stats.completed_tasks = count as u64,
                "failed" => stats.failed_tasks = count as u64,
                "retry" => stats.retry_tasks = count as u64,
                "cancelled" => stats.cancelled_tasks = count as u64,
                "paused" => stats.paused_tasks = count as u64,
                _ => {}
            }
        }
        stats.avg_attempts = if groups > 0.0 {
            total_attempts / groups
        } else {
            0.0
        };
        Ok(stats)
    }

    async fn cleanup_old(&self, retention_days: u32) -> Result<u64> {
        let conn = self.db();
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let n = conn
            .execute(
                "DELETE FROM tasks WHERE status IN ('completed','failed') AND completed_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| TaskFlowError::store(format!("cleanup_old: {e}")))?;
        if n > 0 {
            tracing::info!(removed = n, "retention sweep removed old tasks");
        }
        Ok(n as u64)
    }

    // ── Triggers ───────────────────────────────────────────

    async fn create_trigger(&self, trigger: Trigger) -> Result<Trigger> {
        if !trigger.is_valid() {
            return Err(TaskFlowError::invalid_input(
                "exactly one of target_task_id/task_template must be set",
            ));
        }
        let conn = self.db();
        conn.execute(
            "INSERT INTO triggers (id, session_id, type, name, description, target_task_id,
                task_template_json, condition_type, condition_data_json, schedule,
                webhook_url, webhook_secret, is_active, last_triggered_at, metadata_json,
                created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                trigger.id,
                trigger.session_id,
                trigger_type_str(&trigger.trigger_type),
                trigger.name,
                trigger.description,
                trigger.target_task_id,
                trigger
                    .task_template
                    .as_ref()
                    .map(|t| serde_json::to_string(t).unwrap_or_default()),
                trigger.condition_type,
                trigger
                    .condition_data
                    .as_ref()
                    .map(|d| d.to_string()),
                trigger.schedule,
                trigger.webhook_url,
                trigger.webhook_secret,
                trigger.is_active as i64,
                trigger.last_triggered_at.map(|t| t.to_rfc3339()),
                trigger.metadata.to_string(),
                trigger.created_at.to_rfc3339(),
                trigger.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TaskFlowError::store(format!("create_trigger: {e}")))?;
        Ok(trigger)
    }

    async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>> {
        let conn = self.db();
        conn.query_row(&format!("{TRIGGER_COLUMNS} WHERE id = ?1"), params![id], |r| {
            trigger_from_row(r)
        })
        .optional()
        .map_err(|e| TaskFlowError::store(format!("get_trigger: {e}")))
    }

    async fn get_active_triggers(&self, session_id: Option<&str>) -> Result<Vec<Trigger>> {
        let conn = self.db();
        let sql = if session_id.is_some() {
            format!("{TRIGGER_COLUMNS} WHERE is_active = 1 AND session_id = ?1")
        } else {
            format!("{TRIGGER_COLUMNS} WHERE is_active = 1")
        };
        let mut stmt =
            stmt_err(conn.prepare(&sql))?;
        let rows = if let Some(sid) = session_id {
            stmt_err(stmt.query_map(params![sid], |r| trigger_from_row(r)))?
        } else {
            stmt_err(stmt.query_map([], |r| trigger_from_row(r)))?
        };
        let mut triggers = Vec::new();
        for row in rows {
            triggers.push(row.map_err(|e| TaskFlowError::store(format!("row: {e}")))?);
        }
        Ok(triggers)
    }

    async fn set_trigger_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.db();
        conn.execute(
            "UPDATE triggers SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active as i64, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| TaskFlowError::store(format!("set_trigger_active: {e}")))?;
        Ok(())
    }

    async fn mark_trigger_fired(&self, id: &str) -> Result<()> {
        let conn = self.db();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE triggers SET last_triggered_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )
        .map_err(|e| TaskFlowError::store(format!("mark_trigger_fired: {e}")))?;
        Ok(())
    }

    // ── Execution history / metrics ─────────────────────────

    async fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        let conn = self.db();
        conn.execute(
            "INSERT INTO execution_history (id, task_id, status, start_time, end_time,
                execution_time, input_tokens, output_tokens, total_tokens, error,
                metadata_json, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                record.id,
                record.task_id,
                record.status.to_string(),
                record.start_time.to_rfc3339(),
                record.end_time.map(|t| t.to_rfc3339()),
                record.execution_time,
                record.input_tokens,
                record.output_tokens,
                record.total_tokens,
                record.error,
                record.metadata.to_string(),
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TaskFlowError::store(format!("record_execution: {e}")))?;
        Ok(())
    }

    async fn record_metrics(&self, snapshot: MetricsSnapshot) -> Result<()> {
        let conn = self.db();
        conn.execute(
            "INSERT INTO metrics (id, timestamp, total_tasks, pending_tasks, running_tasks,
                completed_tasks, failed_tasks, avg_execution_time, success_rate,
                active_workers, queue_depth, memory_used, memory_total, metadata_json, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                snapshot.id,
                snapshot.timestamp.to_rfc3339(),
                snapshot.total_tasks,
                snapshot.pending_tasks,
                snapshot.running_tasks,
                snapshot.completed_tasks,
                snapshot.failed_tasks,
                snapshot.avg_execution_time,
                snapshot.success_rate,
                snapshot.active_workers,
                snapshot.queue_depth,
                snapshot.memory_used,
                snapshot.memory_total,
                snapshot.metadata.to_string(),
                snapshot.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TaskFlowError::store(format!("record_metrics: {e}")))?;
        Ok(())
    }
}

// ── Row mapping / SQL fragments ─────────────────────────────

const TASK_COLUMNS: &str = "SELECT id, session_id, prompt, mode, model, status, priority,
    attempts, max_attempts, last_attempt_at, completed_at, result, error, error_stack,
    triggered_by, retry_delay, timeout, scheduled_for, recurring_rule, workflow_id,
    metadata_json, tags_json, created_at, updated_at, expires_at FROM tasks";

const TRIGGER_COLUMNS: &str = "SELECT id, session_id, type, name, description, target_task_id,
    task_template_json, condition_type, condition_data_json, schedule, webhook_url,
    webhook_secret, is_active, last_triggered_at, metadata_json, created_at, updated_at
    FROM triggers";

fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, session_id, prompt, mode, model, status, priority, attempts,
            max_attempts, last_attempt_at, completed_at, result, error, error_stack,
            triggered_by, retry_delay, timeout, scheduled_for, recurring_rule, workflow_id,
            metadata_json, tags_json, created_at, updated_at, expires_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25)",
        params![
            task.id,
            task.session_id,
            task.prompt,
            mode_str(&task.mode),
            task.model,
            task.status.to_string(),
            priority_str(&task.priority),
            task.attempts,
            task.max_attempts,
            task.last_attempt_at.map(|t| t.to_rfc3339()),
            task.completed_at.map(|t| t.to_rfc3339()),
            task.output,
            task.error,
            task.error_stack,
            task.triggered_by,
            task.retry_delay,
            task.timeout,
            task.scheduled_for.map(|t| t.to_rfc3339()),
            task.recurring_rule,
            task.workflow_id,
            task.metadata.to_string(),
            serde_json::to_string(&task.tags).unwrap_or_else(|_| "[]".to_string()),
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
            task.expires_at.map(|t| t.to_rfc3339()),
        ],
    )
    .map_err(|e| TaskFlowError::store(format!("insert_task: {e}")))?;
    Ok(())
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        session_id: row.get(1)?,
        prompt: row.get(2)?,
        mode: parse_mode(&row.get::<_, String>(3)?),
        model: row.get(4)?,
        status: parse_status(&row.get::<_, String>(5)?),
        priority: parse_priority(&row.get::<_, String>(6)?),
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        last_attempt_at: parse_opt_datetime(row.get::<_, Option<String>>(9)?),
        completed_at: parse_opt_datetime(row.get::<_, Option<String>>(10)?),
        output: row.get(11)?,
        error: row.get(12)?,
        error_stack: row.get(13)?,
        triggered_by: row.get(14)?,
        retry_delay: row.get(15)?,
        timeout: row.get(16)?,
        scheduled_for: parse_opt_datetime(row.get::<_, Option<String>>(17)?),
        recurring_rule: row.get(18)?,
        workflow_id: row.get(19)?,
        metadata: serde_json::from_str(&row.get::<_, String>(20)?).unwrap_or_default(),
        tags: serde_json::from_str(&row.get::<_, String>(21)?).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(22)?),
        updated_at: parse_datetime(&row.get::<_, String>(23)?),
        expires_at: parse_opt_datetime(row.get::<_, Option<String>>(24)?),
    })
}

fn trigger_from_row(row: &Row) -> rusqlite::Result<Trigger> {
    Ok(Trigger {
        id: row.get(0)?,
        session_id: row.get(1)?,
        trigger_type: parse_trigger_type(&row.get::<_, String>(2)?),
        name: row.get(3)?,
        description: row.get(4)?,
        target_task_id: row.get(5)?,
        task_template: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        condition_type: row.get(7)?,
        condition_data: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        schedule: row.get(9)?,
        webhook_url: row.get(10)?,
        webhook_secret: row.get(11)?,
        is_active: row.get::<_, i64>(12)? != 0,
        last_triggered_at: parse_opt_datetime(row.get::<_, Option<String>>(13)?),
        metadata: serde_json::from_str(&row.get::<_, String>(14)?).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(15)?),
        updated_at: parse_datetime(&row.get::<_, String>(16)?),
    })
}

fn mode_str(mode: &TaskMode) -> &'static str {
    match mode {
        TaskMode::General => "general",
        TaskMode::Coder => "coder",
        TaskMode::IntenseResearch => "intense-research",
        TaskMode::Spark => "spark",
    }
}

fn parse_mode(s: &str) -> TaskMode {
    match s {
        "coder" => TaskMode::Coder,
        "intense-research" => TaskMode::IntenseResearch,
        "spark" => TaskMode::Spark,
        _ => TaskMode::General,
    }
}

fn priority_str(p: &Priority) -> &'static str {
    match p {
        Priority::Critical => "critical",
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

fn parse_priority(s: &str) -> Priority {
    Priority::from_str(s).unwrap_or(Priority::Normal)
}

fn parse_status(s: &str) -> TaskStatus {
    TaskStatus::from_str(s).unwrap_or(TaskStatus::Pending)
}

fn trigger_type_str(t: &TriggerType) -> &'static str {
    match t {
        TriggerType::Manual => "manual",
        TriggerType::Scheduled => "scheduled",
        TriggerType::Webhook => "webhook",
        TriggerType::AiGenerated => "ai-generated",
        TriggerType::ConditionBased => "condition-based",
        TriggerType::Chain => "chain",
        TriggerType::TimeBased => "time-based",
    }
}

fn parse_trigger_type(s: &str) -> TriggerType {
    match s {
        "scheduled" => TriggerType::Scheduled,
        "webhook" => TriggerType::Webhook,
        "ai-generated" => TriggerType::AiGenerated,
        "condition-based" => TriggerType::ConditionBased,
        "chain" => TriggerType::Chain,
        "time-based" => TriggerType::TimeBased,
        _ => TriggerType::Manual,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn stmt_err<T>(r: std::result::Result<T, rusqlite::Error>) -> Result<T> {
    r.map_err(|e| TaskFlowError::store(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::types::TaskMode;

    async fn test_store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn sample_spec() -> NewTask {
        NewTask {
            session_id: "s1".into(),
            prompt: "do the thing".into(),
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
        }
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.prompt, "do the thing");
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.attempts, 0);
    }

    #[tokio::test]
    async fn test_create_task_rejects_missing_fields() {
        let store = test_store().await;
        let mut spec = sample_spec();
        spec.prompt = String::new();
        let err = store.create_task(spec).await.unwrap_err();
        assert!(matches!(err, TaskFlowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_batch_all_or_nothing() {
        let store = test_store().await;
        let mut bad = sample_spec();
        bad.prompt = String::new();
        let specs = vec![sample_spec(), bad, sample_spec()];
        let err = store.create_tasks_batch(specs).await.unwrap_err();
        assert!(matches!(err, TaskFlowError::InvalidInput(_)));
        let stats = store.get_queue_stats(None).await.unwrap();
        assert_eq!(stats.total_tasks, 0);
    }

    #[tokio::test]
    async fn test_batch_success() {
        let store = test_store().await;
        let specs = vec![sample_spec(), sample_spec(), sample_spec()];
        let created = store.create_tasks_batch(specs).await.unwrap();
        assert_eq!(created.len(), 3);
        let session_tasks = store.get_session_tasks("s1", None).await.unwrap();
        assert_eq!(session_tasks.len(), 3);
    }

    #[tokio::test]
    async fn test_status_transition_valid_and_invalid() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        store
            .update_status(&task.id, TaskStatus::Running)
            .await
            .unwrap();
        let err = store
            .update_status(&task.id, TaskStatus::Paused)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFlowError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_update_result_completed() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        store
            .update_status(&task.id, TaskStatus::Running)
            .await
            .unwrap();
        store
            .update_result(&task.id, Some("ok"), None)
            .await
            .unwrap();
        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.output.as_deref(), Some("ok"));
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_increment_attempts_and_schedule_retry() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        let n = store.increment_attempts(&task.id).await.unwrap();
        assert_eq!(n, 1);
        store.schedule_retry(&task.id, 2000).await.unwrap();
        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Retry);
        assert!(fetched.scheduled_for.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_update_priority_only_when_pending() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        assert!(
            store
                .update_priority(&task.id, Priority::Critical)
                .await
                .unwrap()
        );
        store
            .update_status(&task.id, TaskStatus::Running)
            .await
            .unwrap();
        assert!(
            !store
                .update_priority(&task.id, Priority::Low)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_get_pending_dispatch_aging_order() {
        let store = test_store().await;
        let mut old_normal = sample_spec();
        old_normal.priority = Priority::Normal;
        let old_task = store.create_task(old_normal).await.unwrap();

        // Backdate creation by 50 minutes directly via SQL (store has no
        // public "set created_at" — tests reach into the connection).
        {
            let conn = store.db();
            let fifty_min_ago = (Utc::now() - chrono::Duration::minutes(50)).to_rfc3339();
            conn.execute(
                "UPDATE tasks SET created_at = ?1 WHERE id = ?2",
                params![fifty_min_ago, old_task.id],
            )
            .unwrap();
        }

        let mut fresh_critical = sample_spec();
        fresh_critical.priority = Priority::Critical;
        store.create_task(fresh_critical).await.unwrap();

        let dispatch = store.get_pending_dispatch(1).await.unwrap();
        assert_eq!(dispatch.len(), 1);
        assert_eq!(dispatch[0].id, old_task.id);
    }

    #[tokio::test]
    async fn test_cleanup_old() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        store
            .update_status(&task.id, TaskStatus::Running)
            .await
            .unwrap();
        store
            .update_result(&task.id, Some("ok"), None)
            .await
            .unwrap();
        {
            let conn = store.db();
            let long_ago = (Utc::now() - chrono::Duration::days(60)).to_rfc3339();
            conn.execute(
                "UPDATE tasks SET completed_at = ?1 WHERE id = ?2",
                params![long_ago, task.id],
            )
            .unwrap();
        }
        let removed = store.cleanup_old(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_task(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trigger_crud() {
        let store = test_store().await;
        let now = Utc::now();
        let trigger = Trigger {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: "s1".into(),
            trigger_type: TriggerType::Manual,
            name: "t1".into(),
            description: None,
            target_task_id: Some("task-x".into()),
            task_template: None,
            condition_type: None,
            condition_data: None,
            schedule: None,
            webhook_url: None,
            webhook_secret: None,
            is_active: true,
            last_triggered_at: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        let created = store.create_trigger(trigger).await.unwrap();
        let fetched = store.get_trigger(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "t1");

        let active = store.get_active_triggers(Some("s1")).await.unwrap();
        assert_eq!(active.len(), 1);

        store.set_trigger_active(&created.id, false).await.unwrap();
        let active = store.get_active_triggers(Some("s1")).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_get_tasks_by_status() {
        let store = test_store().await;
        let task = store.create_task(sample_spec()).await.unwrap();
        store.create_task(sample_spec()).await.unwrap();
        store
            .update_status(&task.id, TaskStatus::Running)
            .await
            .unwrap();

        let running = store.get_tasks_by_status(TaskStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, task.id);

        let pending = store.get_tasks_by_status(TaskStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_run_transaction_creates_and_updates() {
        let store = test_store().await;
        let existing = store.create_task(sample_spec()).await.unwrap();

        store
            .run_transaction(vec![
                TransactionOp::CreateTask(sample_spec()),
                TransactionOp::UpdateStatus {
                    id: existing.id.clone(),
                    status: TaskStatus::Cancelled,
                },
            ])
            .await
            .unwrap();

        let stats = store.get_queue_stats(None).await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        let updated = store.get_task(&existing.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_batch_update_status() {
        let store = test_store().await;
        let specs = vec![sample_spec(), sample_spec()];
        let created = store.create_tasks_batch(specs).await.unwrap();
        let ids: Vec<String> = created.iter().map(|t| t.id.clone()).collect();
        store
            .update_tasks_batch(&ids, TaskStatus::Cancelled)
            .await
            .unwrap();
        for id in &ids {
            let t = store.get_task(id).await.unwrap().unwrap();
            assert_eq!(t.status, TaskStatus::Cancelled);
        }
    }
}
