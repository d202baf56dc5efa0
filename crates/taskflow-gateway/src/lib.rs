//! Thin Axum HTTP surface over the Task Queue, Trigger Engine, and Health
//! Monitor.

pub mod response;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router};

use std::net::SocketAddr;
use std::sync::Arc;

/// Binds and serves the gateway router until the process is killed.
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}
