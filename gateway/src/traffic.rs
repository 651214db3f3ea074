//! In-memory traffic log exposed through `/control/stats` and `/metrics`.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest
//! entry is evicted to make room for the newest. This gives a bounded, O(1)
//! memory footprint regardless of request volume.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push]
/// uses a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 { 0.0 } else { entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64 };

        let error_count = entries.iter().filter(|e| !e.success).count();
        let escalation_count = entries.iter().filter(|e| e.escalated).count();

        let mut model_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in entries.iter() {
            *model_counts.entry(entry.model.clone()).or_default() += 1;
        }

        let success_rate = if total == 0 { None } else { Some((total - error_count) as f64 / total as f64) };

        TrafficStats { total_requests: total, error_count, escalation_count, avg_latency_ms, success_rate, model_counts }
    }
}

/// A single completed-request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub task_type: Option<String>,
    pub requested_model: Option<String>,
    /// Provider/model the request was ultimately dispatched to.
    pub model: String,
    pub provider: String,
    pub routing_mode: Option<String>,
    pub escalated: bool,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl TrafficEntry {
    pub fn new(provider: String, model: String, latency_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            task_type: None,
            requested_model: None,
            model,
            provider,
            routing_mode: None,
            escalated: false,
            latency_ms,
            success,
            error: None,
        }
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task_type = Some(task_type.to_string());
        self
    }

    pub fn with_requested_model(mut self, model: &str) -> Self {
        self.requested_model = Some(model.to_string());
        self
    }

    pub fn with_routing_mode(mut self, mode: &str) -> Self {
        self.routing_mode = Some(mode.to_string());
        self
    }

    pub fn mark_escalated(mut self) -> Self {
        self.escalated = true;
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub escalation_count: usize,
    pub avg_latency_ms: f64,
    pub success_rate: Option<f64>,
    pub model_counts: std::collections::HashMap<String, usize>,
}
