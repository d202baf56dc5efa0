//! Gateway wiring: one `AppState` constructed once in `main`, cloned via
//! `Arc` into every handler — same shape as `bizclaw-gateway::server::AppState`.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use taskflow_health::HealthMonitor;
use taskflow_queue::TaskQueue;
use taskflow_store::TaskStore;
use taskflow_triggers::TriggerEngine;

use crate::routes;

pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<TaskQueue>,
    pub triggers: Arc<TriggerEngine>,
    pub health: Arc<HealthMonitor>,
    pub start_time: Instant,
    /// Gates `/tasks` submission; toggled by `/start` and `/stop` (spec §4.7
    /// lifecycle endpoints).
    pub accepting: AtomicBool,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tasks", get(routes::get_session_tasks).post(routes::submit_task))
        .route("/tasks/batch", post(routes::submit_batch))
        .route("/tasks/{id}", get(routes::get_task))
        .route("/tasks/{id}/cancel", put(routes::cancel_task))
        .route("/tasks/{id}/pause", put(routes::pause_task))
        .route("/tasks/{id}/resume", put(routes::resume_task))
        .route("/tasks/reprioritize", put(routes::reprioritize_task))
        .route("/triggers", get(routes::list_triggers).post(routes::create_trigger))
        .route("/triggers/{id}/fire", post(routes::fire_trigger))
        .route("/stats", get(routes::stats))
        .route("/health", get(routes::health))
        .route("/start", post(routes::start))
        .route("/stop", post(routes::stop))
        .route("/reset", post(routes::reset))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
