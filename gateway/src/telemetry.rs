//! Telemetry sink — one fire-and-forget event per completed request.
//!
//! Mirrors the shape of every per-request log line the teacher emits from
//! its router, generalized into an explicit trait so the cloud-upload
//! collaborator (out of scope) can be swapped in without touching the
//! pipeline.

use crate::task_type::TaskType;

#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub task_type: TaskType,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    /// Rough cost estimate in USD; zero when no pricing table is configured.
    pub cost_estimate: f64,
}

/// Accepts one record per completed request. Implementations must never let
/// a failure here propagate to the request path.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Default sink: logs via `tracing`, same spirit as the teacher's per-request
/// info-level log line in its router.
#[derive(Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        tracing::info!(
            task_type = ?event.task_type,
            provider = %event.provider,
            model = %event.model,
            prompt_tokens = event.prompt_tokens,
            completion_tokens = event.completion_tokens,
            latency_ms = event.latency_ms,
            success = event.success,
            cost_estimate = event.cost_estimate,
            "request completed"
        );
    }
}

/// Discards everything; used in tests that don't care about telemetry output.
#[derive(Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl TelemetrySink for CollectingSink {
        fn record(&self, event: TelemetryEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn sink_receives_one_event_per_call() {
        let sink = CollectingSink::default();
        sink.record(TelemetryEvent {
            task_type: TaskType::General,
            provider: "anthropic".into(),
            model: "claude-3-5-haiku-20241022".into(),
            prompt_tokens: 10,
            completion_tokens: 5,
            latency_ms: 120,
            success: true,
            cost_estimate: 0.0,
        });
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn null_sink_never_panics() {
        let sink = NullTelemetrySink;
        sink.record(TelemetryEvent {
            task_type: TaskType::CodeGeneration,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency_ms: 0,
            success: false,
            cost_estimate: 0.0,
        });
    }
}
