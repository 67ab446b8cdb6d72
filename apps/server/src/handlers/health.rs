use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub backend_ok: bool,
    pub open_sessions: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backend_ok = match state.backend.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("backend health check failed: {:#}", e);
            false
        }
    };

    Json(HealthResponse {
        status: if backend_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        backend_ok,
        open_sessions: state.sessions.len(),
    })
}
