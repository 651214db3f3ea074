//! Request routing — the brain of the gateway.
//!
//! Ties together model-alias resolution, task/complexity classification,
//! routing-mode/target selection, cooldown checks, cascade escalation,
//! dialect translation, and upstream dispatch into the two HTTP-facing
//! pipelines: the Anthropic-native `/v1/messages` path and the OpenAI-shaped
//! `/v1/chat/completions` path.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::api::rate_limit::RateLimiter;
use crate::cascade::{self, CascadePlan, DispatchFailure, DispatchFn, DispatchOutcome};
use crate::clock::{Clock, SystemClock};
use crate::complexity;
use crate::config::Config;
use crate::cooldown::CooldownManager;
use crate::dialect::{anthropic, gemini, passthrough, types};
use crate::dispatcher::Dispatcher;
use crate::error::{AppError, AppErrorKind};
use crate::model_registry::{self, Provider};
use crate::routing::{self, RoutingMode, RoutingTarget};
use crate::task_type::{self, TaskType};
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetrySink};
use crate::traffic::{TrafficEntry, TrafficLog};

pub const BYPASS_HEADER: &str = "x-relayplane-bypass";
pub const MODEL_OVERRIDE_HEADER: &str = "x-relayplane-model";

/// In-memory, process-local override of the routing config — the `enabled`
/// flag and a field-wise overlay patch applied on top of the loaded [`Config`].
/// Persisting this overlay to disk is the excluded external collaborator; this
/// struct only ever mutates the in-process snapshot.
pub struct ControlState {
    pub enabled: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Shared application state injected into every request handler.
pub struct RouterState {
    config: RwLock<Arc<Config>>,
    pub traffic: Arc<TrafficLog>,
    pub cooldown: Arc<CooldownManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub started_at: Instant,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub control: RwLock<ControlState>,
}

impl RouterState {
    pub fn new(config: Arc<Config>, traffic: Arc<TrafficLog>) -> Self {
        let rate_limiter = config.gateway.rate_limit_rpm.filter(|&rpm| rpm > 0).map(|rpm| Arc::new(RateLimiter::new(rpm)));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
        let cooldown = Arc::new(CooldownManager::new(
            clock.clone(),
            config.reliability.cooldown_window_ms,
            config.reliability.cooldown_allowed_fails,
            config.reliability.cooldown_duration_ms,
        ));
        let dispatcher = Arc::new(Dispatcher::new(config.gateway.request_timeout_ms));
        Self {
            config: RwLock::new(config),
            traffic,
            cooldown,
            dispatcher,
            clock,
            telemetry: Arc::new(TracingTelemetrySink),
            started_at: Instant::now(),
            rate_limiter,
            control: RwLock::new(ControlState::default()),
        }
    }

    pub async fn config(&self) -> Arc<Config> {
        self.config.read().await.clone()
    }

    pub async fn replace_config(&self, new: Arc<Config>) {
        *self.config.write().await = new;
    }
}

pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Result of running a request through either HTTP-facing pipeline.
pub enum PipelineOutcome {
    Buffered(Value),
    Stream(BoxByteStream),
}

fn bypass_requested(headers: &HeaderMap, control_enabled: bool) -> bool {
    if !control_enabled {
        return true;
    }
    headers.get(BYPASS_HEADER).and_then(|v| v.to_str().ok()).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

fn model_override(headers: &HeaderMap, fallback: &str) -> String {
    headers.get(MODEL_OVERRIDE_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string).unwrap_or_else(|| fallback.to_string())
}

fn has_incoming_anthropic_auth(headers: &HeaderMap) -> bool {
    headers.contains_key(axum::http::header::AUTHORIZATION) || headers.contains_key("x-api-key")
}

fn infer_task(messages: &[types::Message]) -> TaskType {
    let joined = messages.iter().map(|m| m.text_content()).collect::<Vec<_>>().join("\n");
    task_type::infer(&joined).0
}

fn mode_label(mode: RoutingMode) -> &'static str {
    match mode {
        RoutingMode::Auto => "auto",
        RoutingMode::Cost => "cost",
        RoutingMode::Fast => "fast",
        RoutingMode::Quality => "quality",
        RoutingMode::Passthrough => "passthrough",
    }
}

async fn record(
    state: &RouterState,
    requested_model: &str,
    provider: &str,
    model: &str,
    task: TaskType,
    mode: RoutingMode,
    escalated: bool,
    latency_ms: u64,
    success: bool,
    error: Option<&str>,
    usage: Option<(u64, u64)>,
) {
    let mut entry = TrafficEntry::new(provider.to_string(), model.to_string(), latency_ms, success)
        .with_task_type(&format!("{task:?}"))
        .with_requested_model(requested_model)
        .with_routing_mode(mode_label(mode));
    if escalated {
        entry = entry.mark_escalated();
    }
    if let Some(err) = error {
        entry = entry.with_error(err);
    }
    state.traffic.push(entry);

    let (prompt_tokens, completion_tokens) = usage.unwrap_or((0, 0));
    state.telemetry.record(TelemetryEvent {
        task_type: task,
        provider: provider.to_string(),
        model: model.to_string(),
        prompt_tokens,
        completion_tokens,
        latency_ms,
        success,
        cost_estimate: 0.0,
    });
}

/// Feeds upstream bytes through `transcode` one chunk at a time, buffering the
/// SSE lines it yields so each `poll_next` emits exactly one.
fn transcode_stream<S>(upstream: S, transcode: impl FnMut(&[u8]) -> Vec<String> + Send + 'static) -> BoxByteStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    struct State<S, F> {
        upstream: Pin<Box<S>>,
        transcode: F,
        queue: VecDeque<String>,
    }
    let initial = State { upstream: Box::pin(upstream), transcode, queue: VecDeque::new() };
    Box::pin(futures_util::stream::unfold(initial, move |mut st| async move {
        loop {
            if let Some(line) = st.queue.pop_front() {
                return Some((Ok(Bytes::from(line)), st));
            }
            match st.upstream.next().await {
                Some(Ok(bytes)) => {
                    let lines = (st.transcode)(&bytes);
                    st.queue.extend(lines);
                }
                Some(Err(e)) => return Some((Err(std::io::Error::other(e.to_string())), st)),
                None => return None,
            }
        }
    }))
}

fn passthrough_byte_stream<S>(upstream: S) -> BoxByteStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    Box::pin(upstream.map(|item| item.map_err(|e| std::io::Error::other(e.to_string()))))
}

/// Builds and dispatches a buffered (non-streaming) request to `provider`
/// using `normalized` as the OpenAI-origin request, returning the
/// OpenAI-shaped response body plus the text used for cascade triggers.
async fn dispatch_buffered_openai_origin(
    state: &RouterState,
    config: &Config,
    headers: &HeaderMap,
    provider: Provider,
    model: &str,
    original_body: &Value,
    normalized: &types::NormalizedRequest,
) -> Result<(Value, String, Option<(u64, u64)>), AppError> {
    let url = state.dispatcher.endpoint(provider, model, false, config)?;
    let auth_headers = state.dispatcher.build_headers(provider, model, config, headers)?;

    match provider {
        Provider::Anthropic => {
            let body = anthropic::to_anthropic(
                &normalized.messages,
                &normalized.tools,
                normalized.tool_choice.as_ref(),
                normalized.max_tokens,
                normalized.temperature,
                &normalized.stop_sequences,
                model,
                false,
            );
            let response = state.dispatcher.send_buffered(&url, auth_headers, body).await?;
            let resp = anthropic::from_anthropic(&response)?;
            let usage = Some((resp.usage.prompt_tokens, resp.usage.completion_tokens));
            let text = resp.text.clone();
            Ok((anthropic::normalized_to_openai_response(&resp, model), text, usage))
        }
        Provider::Google => {
            let body = gemini::to_gemini(&normalized.messages, normalized.max_tokens, normalized.temperature);
            let response = state.dispatcher.send_buffered(&url, auth_headers, body).await?;
            let resp = gemini::from_gemini(&response);
            let usage = Some((resp.usage.prompt_tokens, resp.usage.completion_tokens));
            let text = resp.text.clone();
            Ok((anthropic::normalized_to_openai_response(&resp, model), text, usage))
        }
        Provider::OpenAi | Provider::Xai | Provider::Moonshot | Provider::Local => {
            let body = passthrough::rewrite(original_body.clone(), model, false);
            let response = state.dispatcher.send_buffered(&url, auth_headers, body).await?;
            let text = response.pointer("/choices/0/message/content").and_then(Value::as_str).unwrap_or_default().to_string();
            let usage = response.get("usage").map(|u| {
                (
                    u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                    u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
                )
            });
            Ok((response, text, usage))
        }
    }
}

async fn dispatch_stream_openai_origin(
    state: &RouterState,
    config: &Config,
    headers: &HeaderMap,
    provider: Provider,
    model: &str,
    original_body: &Value,
    normalized: &types::NormalizedRequest,
) -> Result<BoxByteStream, AppError> {
    let url = state.dispatcher.endpoint(provider, model, true, config)?;
    let auth_headers = state.dispatcher.build_headers(provider, model, config, headers)?;

    match provider {
        Provider::Anthropic => {
            let body = anthropic::to_anthropic(
                &normalized.messages,
                &normalized.tools,
                normalized.tool_choice.as_ref(),
                normalized.max_tokens,
                normalized.temperature,
                &normalized.stop_sequences,
                model,
                true,
            );
            let upstream = state.dispatcher.send_stream(&url, auth_headers, body).await?;
            let mut transcoder = anthropic::AnthropicSseTranscoder::new(model);
            Ok(transcode_stream(upstream, move |bytes| transcoder.push(bytes)))
        }
        Provider::Google => {
            let body = gemini::to_gemini(&normalized.messages, normalized.max_tokens, normalized.temperature);
            let upstream = state.dispatcher.send_stream(&url, auth_headers, body).await?;
            let mut transcoder = gemini::GeminiSseTranscoder::new(model);
            Ok(transcode_stream(upstream, move |bytes| transcoder.push(bytes)))
        }
        Provider::OpenAi | Provider::Xai | Provider::Moonshot | Provider::Local => {
            let body = passthrough::rewrite(original_body.clone(), model, true);
            let upstream = state.dispatcher.send_stream(&url, auth_headers, body).await?;
            Ok(passthrough_byte_stream(upstream))
        }
    }
}

/// `POST /v1/chat/completions` — OpenAI-dialect pipeline.
pub async fn handle_openai(state: &RouterState, headers: &HeaderMap, body: Value) -> Result<PipelineOutcome, AppError> {
    let config = state.config().await;
    let control_enabled = state.control.read().await.enabled;

    let requested_model = model_override(headers, body.get("model").and_then(Value::as_str).unwrap_or_default());
    let bypass = bypass_requested(headers, control_enabled);
    let (base, suffix) = model_registry::parse_suffix(&requested_model);
    let mode = routing::select_mode(&base, suffix.as_deref(), bypass);

    let normalized = types::from_openai_body(&body)?;
    let task = infer_task(&normalized.messages);
    let complexity = complexity::classify(&normalized.messages);

    let target = routing::select_target(mode, &base, &config, task, complexity, normalized.stream, false)?;
    let t0 = state.clock.now_ms();

    match target {
        RoutingTarget::Single { provider, model } => {
            if !state.cooldown.is_available(provider.as_str()).await {
                return Err(AppError::provider_cooled(provider.as_str()));
            }

            if normalized.stream {
                let result = dispatch_stream_openai_origin(state, &config, headers, provider, &model, &body, &normalized).await;
                let latency_ms = (state.clock.now_ms() - t0).max(0) as u64;
                match result {
                    Ok(stream) => {
                        state.cooldown.record_success(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, true, None, None).await;
                        Ok(PipelineOutcome::Stream(stream))
                    }
                    Err(e) => {
                        state.cooldown.record_failure(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, false, Some(&e.message), None).await;
                        Err(e)
                    }
                }
            } else {
                let result = dispatch_buffered_openai_origin(state, &config, headers, provider, &model, &body, &normalized).await;
                let latency_ms = (state.clock.now_ms() - t0).max(0) as u64;
                match result {
                    Ok((response, _text, usage)) => {
                        state.cooldown.record_success(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, true, None, usage).await;
                        Ok(PipelineOutcome::Buffered(response))
                    }
                    Err(e) => {
                        state.cooldown.record_failure(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, false, Some(&e.message), None).await;
                        Err(e)
                    }
                }
            }
        }
        RoutingTarget::Cascade(plan) => {
            let dispatch: Box<DispatchFn> = Box::new(|model: &str| {
                let model = model.to_string();
                let headers = headers.clone();
                let config = config.clone();
                let body = body.clone();
                let normalized = normalized.clone();
                Box::pin(async move {
                    let (provider, resolved_model) = model_registry::resolve_explicit(&model)
                        .ok_or_else(|| DispatchFailure { transient: false, error: AppError::unknown_model(format!("unknown cascade model `{model}`"), Vec::new()) })?;
                    dispatch_buffered_openai_origin(state, &config, &headers, provider, &resolved_model, &body, &normalized)
                        .await
                        .map(|(response, text, _usage)| DispatchOutcome { text, response, provider: provider.as_str().to_string(), model: resolved_model })
                        .map_err(|error| DispatchFailure { transient: matches!(error.kind, AppErrorKind::NetworkError | AppErrorKind::ProviderError { .. }), error })
                })
            });

            // Availability is snapshotted once up front: `cascade::run`'s
            // `is_cooled` predicate is synchronous, so it can't await the
            // cooldown manager's lock itself.
            let mut cooled_by_model = std::collections::HashMap::new();
            for model in &plan.models {
                let available = match model_registry::resolve_explicit(model) {
                    Some((provider, _)) => state.cooldown.is_available(provider.as_str()).await,
                    None => true,
                };
                cooled_by_model.insert(model.clone(), !available);
            }
            let is_cooled = move |model: &str| -> bool { cooled_by_model.get(model).copied().unwrap_or(false) };
            let result = cascade::run(&plan, is_cooled, &dispatch).await;
            let latency_ms = (state.clock.now_ms() - t0).max(0) as u64;
            match result {
                Ok((outcome, escalations)) => {
                    state.cooldown.record_success(&outcome.provider).await;
                    record(state, &requested_model, &outcome.provider, &outcome.model, task, mode, escalations > 0, latency_ms, true, None, None).await;
                    Ok(PipelineOutcome::Buffered(outcome.response))
                }
                Err(e) => {
                    record(state, &requested_model, "cascade", &plan_models_first(&plan), task, mode, false, latency_ms, false, Some(&e.message), None).await;
                    Err(e)
                }
            }
        }
    }
}

fn plan_models_first(plan: &CascadePlan) -> String {
    plan.models.first().cloned().unwrap_or_default()
}

/// `POST /v1/messages` — Anthropic-native pipeline: the gateway never
/// translates dialects here, it only resolves which Anthropic model to
/// forward to (routing always rejects non-Anthropic targets on this endpoint).
pub async fn handle_anthropic(state: &RouterState, headers: &HeaderMap, body: Value) -> Result<PipelineOutcome, AppError> {
    let config = state.config().await;
    let control_enabled = state.control.read().await.enabled;

    let requested_model = model_override(headers, body.get("model").and_then(Value::as_str).unwrap_or_default());
    let bypass = bypass_requested(headers, control_enabled);
    let (base, suffix) = model_registry::parse_suffix(&requested_model);
    let mode = routing::select_mode(&base, suffix.as_deref(), bypass);

    let normalized = types::from_anthropic_body(&body)?;
    let task = infer_task(&normalized.messages);
    let complexity = complexity::classify(&normalized.messages);

    let target = routing::select_target(mode, &base, &config, task, complexity, normalized.stream, true)?;

    if !has_incoming_anthropic_auth(headers) && config.api_key(Provider::Anthropic).is_none() {
        return Err(AppError::missing_auth("no Anthropic credentials: pass an Authorization/x-api-key header or set ANTHROPIC_API_KEY"));
    }

    let t0 = state.clock.now_ms();

    match target {
        RoutingTarget::Single { provider, model } => {
            if !state.cooldown.is_available(provider.as_str()).await {
                return Err(AppError::provider_cooled(provider.as_str()));
            }

            let url = state.dispatcher.endpoint(provider, &model, normalized.stream, &config)?;
            let auth_headers = state.dispatcher.build_headers(provider, &model, &config, headers)?;
            let rewritten = passthrough::rewrite(body, &model, normalized.stream);

            if normalized.stream {
                let result = state.dispatcher.send_stream(&url, auth_headers, rewritten).await;
                let latency_ms = (state.clock.now_ms() - t0).max(0) as u64;
                match result {
                    Ok(upstream) => {
                        state.cooldown.record_success(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, true, None, None).await;
                        Ok(PipelineOutcome::Stream(passthrough_byte_stream(upstream)))
                    }
                    Err(e) => {
                        state.cooldown.record_failure(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, false, Some(&e.message), None).await;
                        Err(e)
                    }
                }
            } else {
                let result = state.dispatcher.send_buffered(&url, auth_headers, rewritten).await;
                let latency_ms = (state.clock.now_ms() - t0).max(0) as u64;
                match result {
                    Ok(response) => {
                        state.cooldown.record_success(provider.as_str()).await;
                        let usage = response.get("usage").map(|u| {
                            (
                                u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                                u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                            )
                        });
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, true, None, usage).await;
                        Ok(PipelineOutcome::Buffered(response))
                    }
                    Err(e) => {
                        state.cooldown.record_failure(provider.as_str()).await;
                        record(state, &requested_model, provider.as_str(), &model, task, mode, false, latency_ms, false, Some(&e.message), None).await;
                        Err(e)
                    }
                }
            }
        }
        RoutingTarget::Cascade(plan) => {
            let dispatch: Box<DispatchFn> = Box::new(|model: &str| {
                let model = model.to_string();
                let headers = headers.clone();
                let body = body.clone();
                let config = config.clone();
                Box::pin(async move {
                    let provider = Provider::Anthropic;
                    let url = state
                        .dispatcher
                        .endpoint(provider, &model, false, &config)
                        .map_err(|error| DispatchFailure { transient: false, error })?;
                    let auth_headers = state
                        .dispatcher
                        .build_headers(provider, &model, &config, &headers)
                        .map_err(|error| DispatchFailure { transient: false, error })?;
                    let rewritten = passthrough::rewrite(body, &model, false);
                    let response = state
                        .dispatcher
                        .send_buffered(&url, auth_headers, rewritten)
                        .await
                        .map_err(|error| DispatchFailure { transient: matches!(error.kind, AppErrorKind::NetworkError | AppErrorKind::ProviderError { .. }), error })?;
                    let parsed = anthropic::from_anthropic(&response).map_err(|error| DispatchFailure { transient: false, error })?;
                    Ok(DispatchOutcome { text: parsed.text, response, provider: provider.as_str().to_string(), model })
                })
            });
            let anthropic_available = state.cooldown.is_available("anthropic").await;
            let is_cooled = move |_model: &str| -> bool { !anthropic_available };
            let result = cascade::run(&plan, is_cooled, &dispatch).await;
            let latency_ms = (state.clock.now_ms() - t0).max(0) as u64;
            match result {
                Ok((outcome, escalations)) => {
                    state.cooldown.record_success("anthropic").await;
                    record(state, &requested_model, "anthropic", &outcome.model, task, mode, escalations > 0, latency_ms, true, None, None).await;
                    Ok(PipelineOutcome::Buffered(outcome.response))
                }
                Err(e) => {
                    state.cooldown.record_failure("anthropic").await;
                    record(state, &requested_model, "anthropic", &plan_models_first(&plan), task, mode, false, latency_ms, false, Some(&e.message), None).await;
                    Err(e)
                }
            }
        }
    }
}

/// `POST /v1/messages/count_tokens` — forwarded verbatim; no routing, no
/// dialect translation, since Anthropic owns this endpoint's shape entirely.
pub async fn forward_count_tokens(state: &RouterState, headers: &HeaderMap, body: Value) -> Result<Value, AppError> {
    let config = state.config().await;
    if !has_incoming_anthropic_auth(headers) && config.api_key(Provider::Anthropic).is_none() {
        return Err(AppError::missing_auth("no Anthropic credentials for count_tokens"));
    }
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let base = config.base_url(Provider::Anthropic).unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string());
    let url = format!("{}/count_tokens", base.trim_end_matches('/'));
    let headers_out = state.dispatcher.build_headers(Provider::Anthropic, &model, &config, headers)?;
    state.dispatcher.send_buffered(&url, headers_out, body).await
}
