//! Client-facing API — the endpoint agents and SDKs talk to.
//!
//! This is intentionally a thin layer: all routing logic lives in
//! [`crate::router`]. Handlers translate HTTP concerns (status codes, body
//! framing, streaming vs. buffered) into calls to the router and back.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::model_registry;
use crate::router::{self, PipelineOutcome, RouterState};

/// Builds the client-facing axum router (`gateway.client_port`).
pub fn router(state: Arc<RouterState>, body_limit_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static("x-relayplane-bypass"),
            HeaderName::from_static("x-relayplane-model"),
        ]);

    Router::new()
        .route("/health", get(crate::api::health::health))
        .route("/healthz", get(crate::api::health::health))
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
}

fn pipeline_response(outcome: PipelineOutcome) -> Response {
    match outcome {
        PipelineOutcome::Buffered(value) => (StatusCode::OK, Json(value)).into_response(),
        PipelineOutcome::Stream(stream) => {
            let mut response = Response::new(Body::from_stream(stream));
            response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
    }
}

/// `POST /v1/messages` — Anthropic-native dialect; always resolves to an
/// Anthropic target, so the wire shape never changes.
pub async fn messages(State(state): State<Arc<RouterState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    match router::handle_anthropic(&state, &headers, body).await {
        Ok(outcome) => pipeline_response(outcome),
        Err(e) => e.into_response(),
    }
}

/// `POST /v1/messages/count_tokens` — forwarded verbatim to Anthropic.
pub async fn count_tokens(State(state): State<Arc<RouterState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    match router::forward_count_tokens(&state, &headers, body).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /v1/chat/completions` — OpenAI dialect; may translate to Anthropic
/// or Gemini wire shapes depending on the resolved target.
pub async fn chat_completions(State(state): State<Arc<RouterState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    match router::handle_openai(&state, &headers, body).await {
        Ok(outcome) => pipeline_response(outcome),
        Err(e) => e.into_response(),
    }
}

/// `GET /v1/models` — the synthetic `relayplane:*` routing-mode models, plus
/// the smart aliases and friendly names the registry can resolve.
pub async fn list_models(State(_state): State<Arc<RouterState>>) -> impl IntoResponse {
    let mut data: Vec<Value> = ["relayplane:auto", "relayplane:cost", "relayplane:fast", "relayplane:quality"]
        .iter()
        .map(|id| json!({ "id": id, "object": "model", "owned_by": "relayplane" }))
        .collect();

    data.extend(model_registry::known_names().into_iter().map(|name| json!({ "id": name, "object": "model", "owned_by": "relayplane" })));

    Json(json!({ "object": "list", "data": data }))
}
