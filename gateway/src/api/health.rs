//! Liveness/readiness endpoint shared by both the client and control listeners.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::router::RouterState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `GET /health` / `GET /healthz` — 200 OK with uptime and rolling traffic
/// stats. Has no external dependencies beyond the in-process traffic log, so
/// it never blocks on an upstream provider.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed();
    let stats = state.traffic.stats().await;

    Json(json!({
        "status": "ok",
        "version": VERSION,
        "uptime": uptime.as_secs(),
        "uptimeMs": uptime.as_millis() as u64,
        "requests": stats.total_requests,
        "successRate": stats.success_rate,
        "stats": stats,
    }))
}
