//! Control-plane API (`gateway.control_port`) — `/control/status|enable|
//! disable|stats|config`.
//!
//! Mutations land on an in-process snapshot only. Persisting the overlay back
//! to the on-disk config file is the excluded external collaborator; restart
//! the process to fall back to the file on disk.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::api::health::VERSION;
use crate::config::{ReliabilityConfig, RoutingConfig};
use crate::router::RouterState;

pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/health", get(crate::api::health::health))
        .route("/healthz", get(crate::api::health::health))
        .route("/control/status", get(status).post(status))
        .route("/control/enable", get(enable).post(enable))
        .route("/control/disable", get(disable).post(disable))
        .route("/control/stats", get(stats))
        .route("/control/config", get(get_config).post(patch_config))
        .route("/metrics", get(crate::api::metrics::metrics))
        .with_state(state)
}

async fn status(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let enabled = state.control.read().await.enabled;
    let uptime = state.started_at.elapsed();
    Json(json!({
        "enabled": enabled,
        "version": VERSION,
        "uptimeMs": uptime.as_millis() as u64,
    }))
}

async fn enable(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    state.control.write().await.enabled = true;
    Json(json!({ "enabled": true }))
}

async fn disable(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    state.control.write().await.enabled = false;
    Json(json!({ "enabled": false }))
}

async fn stats(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let stats = state.traffic.stats().await;
    let recent = state.traffic.recent(50).await;
    Json(json!({ "stats": stats, "recent": recent }))
}

async fn get_config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(state.config().await.as_ref().clone())
}

/// Applies a field-wise overlay patch to `routing.*`/`reliability.*` only —
/// the same merge rule the (unimplemented) disk hot-reload would use.
/// Any other top-level key in the patch is ignored.
async fn patch_config(State(state): State<Arc<RouterState>>, Json(patch): Json<Value>) -> impl IntoResponse {
    let mut config = state.config().await.as_ref().clone();

    if let Some(routing_patch) = patch.get("routing") {
        if let Ok(mut current) = serde_json::to_value(&config.routing) {
            merge_object(&mut current, routing_patch);
            if let Ok(merged) = serde_json::from_value::<RoutingConfig>(current) {
                config.routing = merged;
            }
        }
    }

    if let Some(reliability_patch) = patch.get("reliability") {
        if let Ok(mut current) = serde_json::to_value(&config.reliability) {
            merge_object(&mut current, reliability_patch);
            if let Ok(merged) = serde_json::from_value::<ReliabilityConfig>(current) {
                config.reliability = merged;
            }
        }
    }

    state.replace_config(Arc::new(config.clone())).await;
    Json(config)
}

fn merge_object(base: &mut Value, patch: &Value) {
    let (Value::Object(base_map), Value::Object(patch_map)) = (base, patch) else { return };
    for (key, value) in patch_map {
        base_map.insert(key.clone(), value.clone());
    }
}
