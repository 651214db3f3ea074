//! Rolling-window request stats plus circuit-state transition history.
//!
//! Grounded on the gateway's ring-buffer traffic log
//! (`relayplane_gateway::traffic::TrafficLog`): a `Mutex<Vec<_>>` pruned on
//! every read/write rather than a fixed-capacity ring, since the window here
//! is time-bounded (1 hour) instead of count-bounded.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::breaker::BreakerState;
use crate::clock::Clock;

pub const DEFAULT_WINDOW_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
pub struct StatsRecord {
    pub timestamp_ms: i64,
    pub latency_ms: u64,
    pub via_proxy: bool,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub timestamp_ms: i64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_requests: u64,
    pub proxied_requests: u64,
    pub direct_requests: u64,
    pub success_requests: u64,
    pub fail_requests: u64,
    pub avg_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
    pub p99_latency_ms: Option<u64>,
    pub circuit_state: String,
    pub circuit_state_age_ms: Option<i64>,
    pub transitions: Vec<StateTransition>,
}

struct Inner {
    records: Vec<StatsRecord>,
    transitions: Vec<StateTransition>,
    circuit_state: BreakerState,
    circuit_entered_at: i64,
}

pub struct StatsCollector {
    clock: Arc<dyn Clock>,
    window_ms: i64,
    inner: Mutex<Inner>,
}

impl StatsCollector {
    pub fn new(clock: Arc<dyn Clock>, window_ms: i64) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            window_ms,
            inner: Mutex::new(Inner { records: Vec::new(), transitions: Vec::new(), circuit_state: BreakerState::Closed, circuit_entered_at: now }),
        }
    }

    pub fn record_request(&self, latency_ms: u64, via_proxy: bool, success: bool) {
        let timestamp_ms = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();
        inner.records.push(StatsRecord { timestamp_ms, latency_ms, via_proxy, success });
        self.prune(&mut inner);
    }

    pub fn record_state_transition(&self, from: BreakerState, to: BreakerState) {
        let timestamp_ms = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();
        inner.circuit_state = to;
        inner.circuit_entered_at = timestamp_ms;
        inner.transitions.push(StateTransition { timestamp_ms, from: from.to_string(), to: to.to_string() });
    }

    fn prune(&self, inner: &mut Inner) {
        let now = self.clock.now_ms();
        inner.records.retain(|r| now - r.timestamp_ms < self.window_ms);
    }

    pub fn get_stats(&self) -> Stats {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();
        self.prune(&mut inner);

        let total_requests = inner.records.len() as u64;
        let proxied_requests = inner.records.iter().filter(|r| r.via_proxy).count() as u64;
        let direct_requests = total_requests - proxied_requests;
        let success_requests = inner.records.iter().filter(|r| r.success).count() as u64;
        let fail_requests = total_requests - success_requests;

        let mut proxied_latencies: Vec<u64> = inner.records.iter().filter(|r| r.via_proxy).map(|r| r.latency_ms).collect();
        proxied_latencies.sort_unstable();

        let avg_latency_ms = (!proxied_latencies.is_empty())
            .then(|| (proxied_latencies.iter().sum::<u64>() as f64 / proxied_latencies.len() as f64).round());

        Stats {
            total_requests,
            proxied_requests,
            direct_requests,
            success_requests,
            fail_requests,
            avg_latency_ms,
            p50_latency_ms: percentile(&proxied_latencies, 0.50),
            p95_latency_ms: percentile(&proxied_latencies, 0.95),
            p99_latency_ms: percentile(&proxied_latencies, 0.99),
            circuit_state: inner.circuit_state.to_string(),
            circuit_state_age_ms: Some(now - inner.circuit_entered_at),
            transitions: inner.transitions.clone(),
        }
    }
}

/// `idx = ceil(p*N) - 1` over an ascending-sorted, 0-based array.
fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len() as f64;
    let idx = ((p * n).ceil() as usize).saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn collector(window_ms: i64) -> (StatsCollector, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        (StatsCollector::new(clock.clone(), window_ms), clock)
    }

    #[test]
    fn s2_stats_percentiles() {
        let (collector, _clock) = collector(DEFAULT_WINDOW_MS);
        for latency in 1..=100u64 {
            collector.record_request(latency, true, true);
        }
        let stats = collector.get_stats();
        assert_eq!(stats.total_requests, 100);
        assert_eq!(stats.p50_latency_ms, Some(50));
        assert_eq!(stats.p95_latency_ms, Some(95));
        assert_eq!(stats.p99_latency_ms, Some(99));
        assert_eq!(stats.avg_latency_ms, Some(51.0));
    }

    #[test]
    fn percentiles_only_count_proxied_records() {
        let (collector, _clock) = collector(DEFAULT_WINDOW_MS);
        collector.record_request(500, false, true);
        collector.record_request(10, true, true);
        let stats = collector.get_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.proxied_requests, 1);
        assert_eq!(stats.direct_requests, 1);
        assert_eq!(stats.p50_latency_ms, Some(10));
    }

    #[test]
    fn records_outside_window_are_pruned() {
        let (collector, clock) = collector(1_000);
        collector.record_request(5, true, true);
        clock.advance(1_001);
        collector.record_request(10, true, true);
        let stats = collector.get_stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.p50_latency_ms, Some(10));
    }

    #[test]
    fn percentile_ordering_holds() {
        let (collector, _clock) = collector(DEFAULT_WINDOW_MS);
        for latency in [30, 10, 90, 50, 70, 20, 60, 40, 80, 100] {
            collector.record_request(latency, true, true);
        }
        let stats = collector.get_stats();
        assert!(stats.p50_latency_ms.unwrap() <= stats.p95_latency_ms.unwrap());
        assert!(stats.p95_latency_ms.unwrap() <= stats.p99_latency_ms.unwrap());
    }

    #[test]
    fn state_transition_tracks_current_state_and_age() {
        let (collector, clock) = collector(DEFAULT_WINDOW_MS);
        collector.record_state_transition(BreakerState::Closed, BreakerState::Open);
        clock.advance(250);
        let stats = collector.get_stats();
        assert_eq!(stats.circuit_state, "OPEN");
        assert_eq!(stats.circuit_state_age_ms, Some(250));
        assert_eq!(stats.transitions.len(), 1);
    }
}
