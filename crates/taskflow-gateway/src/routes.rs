//! HTTP handlers — a thin mapping over Task Queue / Trigger Engine / Health
//! Monitor (spec §4.7).

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::{Path, Query, State};
use serde::Deserialize;

use taskflow_core::error::TaskFlowError;
use taskflow_core::types::{NewTask, Priority, Task, TaskStatus, Trigger};

use crate::response::{ApiError, ApiResult, ok};
use crate::server::AppState;

pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    axum::Json(spec): axum::Json<NewTask>,
) -> ApiResult<Task> {
    if !state.accepting.load(Ordering::SeqCst) {
        return Err(ApiError(TaskFlowError::invalid_input(
            "queue is stopped; call /start first",
        )));
    }
    let task = state.queue.submit(spec).await?;
    Ok(ok(task))
}

pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    axum::Json(specs): axum::Json<Vec<NewTask>>,
) -> ApiResult<Vec<Task>> {
    if !state.accepting.load(Ordering::SeqCst) {
        return Err(ApiError(TaskFlowError::invalid_input(
            "queue is stopped; call /start first",
        )));
    }
    let tasks = state.queue.submit_batch(specs).await?;
    Ok(ok(tasks))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    let task = state
        .queue
        .get_task(&id)
        .await?
        .ok_or_else(|| TaskFlowError::not_found(format!("task {id}")))?;
    Ok(ok(task))
}

#[derive(Debug, Deserialize)]
pub struct SessionTasksQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
    status: Option<TaskStatus>,
}

pub async fn get_session_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionTasksQuery>,
) -> ApiResult<Vec<Task>> {
    let tasks = state
        .queue
        .get_session_tasks(&q.session_id, q.status)
        .await?;
    Ok(ok(tasks))
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.queue.cancel(&id).await?;
    Ok(ok(()))
}

pub async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.queue.pause(&id).await?;
    Ok(ok(()))
}

pub async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.queue.resume(&id).await?;
    Ok(ok(()))
}

#[derive(Debug, Deserialize)]
pub struct ReprioritizeBody {
    id: String,
    priority: Priority,
}

pub async fn reprioritize_task(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ReprioritizeBody>,
) -> ApiResult<bool> {
    let applied = state.queue.update_priority(&body.id, body.priority).await?;
    Ok(ok(applied))
}

pub async fn create_trigger(
    State(state): State<Arc<AppState>>,
    axum::Json(trigger): axum::Json<Trigger>,
) -> ApiResult<Trigger> {
    let created = state.triggers.create_trigger(trigger).await?;
    Ok(ok(created))
}

#[derive(Debug, Deserialize)]
pub struct TriggerListQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

pub async fn list_triggers(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TriggerListQuery>,
) -> ApiResult<Vec<Trigger>> {
    let triggers = state
        .triggers
        .get_active_triggers(q.session_id.as_deref())
        .await?;
    Ok(ok(triggers))
}

pub async fn fire_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.triggers.fire(&id).await?;
    Ok(ok(()))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<serde_json::Value> {
    let queue_stats = state.queue.get_stats(None).await?;
    let pool_stats = state.queue.pool_stats().await;
    Ok(ok(serde_json::json!({
        "queue": queue_stats,
        "pool": {
            "idle": pool_stats.idle,
            "running": pool_stats.running,
            "error": pool_stats.error,
            "queueLength": pool_stats.queue_length,
            "totalProcessed": pool_stats.total_processed,
            "totalFailed": pool_stats.total_failed,
            "efficiency": pool_stats.efficiency,
        },
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    })))
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<serde_json::Value> {
    let snapshot = state.health.sample().await;
    Ok(ok(serde_json::json!({
        "status": format!("{:?}", snapshot.status).to_lowercase(),
        "score": snapshot.score,
        "store": { "connected": snapshot.store.connected, "latencyMs": snapshot.store.latency_ms },
        "queue": { "pending": snapshot.queue.pending, "oldestPendingMs": snapshot.queue.oldest_pending_ms },
        "worker": {
            "active": snapshot.worker.active,
            "idle": snapshot.worker.idle,
            "stalled": snapshot.worker.stalled,
        },
        "memory": { "usedBytes": snapshot.memory.used_bytes, "totalBytes": snapshot.memory.total_bytes },
        "sampledAt": snapshot.sampled_at.to_rfc3339(),
    })))
}

pub async fn start(State(state): State<Arc<AppState>>) -> ApiResult<()> {
    state.accepting.store(true, Ordering::SeqCst);
    Ok(ok(()))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> ApiResult<()> {
    state.accepting.store(false, Ordering::SeqCst);
    state
        .queue
        .pool()
        .stop(std::time::Duration::from_secs(3))
        .await;
    Ok(ok(()))
}

pub async fn reset(State(state): State<Arc<AppState>>) -> ApiResult<()> {
    state.accepting.store(true, Ordering::SeqCst);
    Ok(ok(()))
}
