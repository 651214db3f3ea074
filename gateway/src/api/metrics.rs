//! Prometheus-compatible `/metrics` endpoint.
//!
//! All metrics are derived from the in-memory ring-buffer window. Because the
//! buffer has a fixed capacity, values represent a **sliding window** of recent
//! requests rather than lifetime counters. Use `TYPE gauge` throughout for
//! semantic accuracy — values may decrease as old entries rotate out.
//!
//! Unlike a flat per-backend request counter, these families are grouped on
//! the routing decisions the gateway itself made — routing mode and inferred
//! task type — so a dashboard can answer "is `quality` mode escalating more
//! than usual" rather than only "how many requests hit `openai`".
//!
//! Metric families:
//! - `relayplane_window_size`        — entries currently in the ring buffer
//! - `relayplane_requests`           — counts by routing mode, task type, outcome
//! - `relayplane_latency_ms_sum`     — sum of latencies per dispatched provider/model (for avg)
//! - `relayplane_latency_ms_count`   — denominator matching the sum above
//! - `relayplane_escalations_total`  — cascade escalations, by routing mode
//! - `relayplane_errors_total`       — requests that returned an error, by provider

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::router::RouterState;

const UNKNOWN: &str = "unknown";

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    // Grab the full ring-buffer window in one lock acquisition.
    let entries = state.traffic.recent(usize::MAX).await;

    // --- aggregate ---
    let window_size = entries.len();

    // (routing_mode, task_type, success) → count
    let mut request_counts: HashMap<(String, String, bool), u64> = HashMap::new();
    // routing_mode → escalation count
    let mut escalations: HashMap<String, u64> = HashMap::new();
    // provider → error count
    let mut errors: HashMap<String, u64> = HashMap::new();
    // (model, provider) → (latency_sum_ms, count)
    let mut latency: HashMap<(String, String), (u64, u64)> = HashMap::new();

    for e in &entries {
        let mode = e.routing_mode.clone().unwrap_or_else(|| UNKNOWN.to_string());
        let task = e.task_type.clone().unwrap_or_else(|| UNKNOWN.to_string());

        if e.escalated {
            *escalations.entry(mode.clone()).or_default() += 1;
        }
        if !e.success {
            *errors.entry(e.provider.clone()).or_default() += 1;
        }

        *request_counts.entry((mode, task, e.success)).or_default() += 1;

        let lat = latency.entry((e.model.clone(), e.provider.clone())).or_default();
        lat.0 += e.latency_ms;
        lat.1 += 1;
    }

    // --- render ---
    let mut out = String::with_capacity(1024);

    out.push_str("# HELP relayplane_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE relayplane_window_size gauge\n");
    out.push_str(&format!("relayplane_window_size {window_size}\n\n"));

    out.push_str("# HELP relayplane_requests Request count in the current window, labelled by routing mode, inferred task type, and outcome.\n");
    out.push_str("# TYPE relayplane_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((mode, task, success), count) in req_rows {
        let success_str = if *success { "true" } else { "false" };
        out.push_str(&format!(
            "relayplane_requests{{routing_mode=\"{mode}\",task_type=\"{task}\",success=\"{success_str}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP relayplane_latency_ms_sum Sum of request latency (ms) in the current window, grouped by the dispatched model and provider.\n");
    out.push_str("# TYPE relayplane_latency_ms_sum gauge\n");
    out.push_str("# HELP relayplane_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE relayplane_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((model, provider), (sum, count)) in lat_rows {
        out.push_str(&format!("relayplane_latency_ms_sum{{model=\"{model}\",provider=\"{provider}\"}} {sum}\n"));
        out.push_str(&format!("relayplane_latency_ms_count{{model=\"{model}\",provider=\"{provider}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP relayplane_escalations_total Cascade escalations in the current window, labelled by routing mode.\n");
    out.push_str("# TYPE relayplane_escalations_total gauge\n");
    let mut esc_rows: Vec<_> = escalations.iter().collect();
    esc_rows.sort_by(|a, b| a.0.cmp(b.0));
    for (mode, count) in esc_rows {
        out.push_str(&format!("relayplane_escalations_total{{routing_mode=\"{mode}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP relayplane_errors_total Requests that returned an error in the current window, labelled by provider.\n");
    out.push_str("# TYPE relayplane_errors_total gauge\n");
    let mut err_rows: Vec<_> = errors.iter().collect();
    err_rows.sort_by(|a, b| a.0.cmp(b.0));
    for (provider, count) in err_rows {
        out.push_str(&format!("relayplane_errors_total{{provider=\"{provider}\"}} {count}\n"));
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::traffic::{TrafficEntry, TrafficLog};

    fn mock_log() -> Arc<TrafficLog> {
        let log = Arc::new(TrafficLog::new(100));
        log.push(
            TrafficEntry::new("openai".into(), "gpt-4o".into(), 120, true)
                .with_requested_model("gpt-4o")
                .with_routing_mode("passthrough")
                .with_task_type("code_generation"),
        );
        log.push(
            TrafficEntry::new("openai".into(), "gpt-4o".into(), 95, true)
                .with_requested_model("gpt-4o")
                .with_routing_mode("passthrough")
                .with_task_type("code_generation"),
        );
        log.push(
            TrafficEntry::new("anthropic".into(), "claude-3-5-haiku-20241022".into(), 430, true)
                .with_routing_mode("auto")
                .with_task_type("general")
                .mark_escalated(),
        );
        log.push(
            TrafficEntry::new("openai".into(), "gpt-4o".into(), 80, false)
                .with_error("upstream 500")
                .with_routing_mode("passthrough")
                .with_task_type("code_generation"),
        );
        log
    }

    #[tokio::test]
    async fn window_size_equals_entry_count() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn errors_are_grouped_by_provider() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let openai_errors = entries.iter().filter(|e| !e.success && e.provider == "openai").count();
        assert_eq!(openai_errors, 1);
    }

    #[tokio::test]
    async fn escalations_are_grouped_by_routing_mode() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let auto_escalations = entries.iter().filter(|e| e.escalated && e.routing_mode.as_deref() == Some("auto")).count();
        assert_eq!(auto_escalations, 1);
    }

    #[tokio::test]
    async fn latency_sum_is_accurate_per_dispatched_target() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let sum: u64 = entries.iter().filter(|e| e.model == "gpt-4o" && e.provider == "openai").map(|e| e.latency_ms).sum();
        // 120 + 95 + 80 = 295
        assert_eq!(sum, 295);
    }
}
