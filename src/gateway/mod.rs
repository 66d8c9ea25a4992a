//! Gateway: live connection endpoint plus a small read-only HTTP surface

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::websocket::ws_handler;
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/requests/{request_ref}", get(handlers::get_request))
        .route(
            "/api/v1/requests/{request_ref}/monitor",
            post(handlers::resume_monitor),
        )
        .with_state(state)
}

/// Serve until the listener fails
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on {}", addr);
    tracing::info!("  WebSocket: ws://{}/ws?user_id=<id>", addr);
    tracing::info!("  Health:    GET /api/v1/health");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
