//! Per-provider cooldown manager — the gateway-side "mini circuit breaker".
//!
//! Independent of the middleware's full breaker ([`crate`]'s sibling crate
//! `relayplane_middleware::breaker`): the gateway always tracks cooldowns
//! internally, even when no middleware wraps it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::Clock;

#[derive(Debug, Clone)]
struct ProviderHealth {
    failures: Vec<i64>,
    cooled_until: Option<i64>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self { failures: Vec::new(), cooled_until: None }
    }
}

pub struct CooldownManager {
    clock: Arc<dyn Clock>,
    window_ms: i64,
    allowed_fails: usize,
    cooldown_ms: i64,
    state: RwLock<HashMap<String, ProviderHealth>>,
}

impl CooldownManager {
    pub fn new(clock: Arc<dyn Clock>, window_ms: i64, allowed_fails: usize, cooldown_ms: i64) -> Self {
        Self { clock, window_ms, allowed_fails, cooldown_ms, state: RwLock::new(HashMap::new()) }
    }

    pub async fn record_failure(&self, provider: &str) {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        let entry = state.entry(provider.to_string()).or_default();
        entry.failures.retain(|&t| now - t < self.window_ms);
        entry.failures.push(now);
        if entry.failures.len() >= self.allowed_fails {
            entry.cooled_until = Some(now + self.cooldown_ms);
        }
    }

    pub async fn record_success(&self, provider: &str) {
        let mut state = self.state.write().await;
        state.insert(provider.to_string(), ProviderHealth::default());
    }

    pub async fn is_available(&self, provider: &str) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        let Some(entry) = state.get_mut(provider) else { return true };
        match entry.cooled_until {
            None => true,
            Some(until) if now >= until => {
                entry.cooled_until = None;
                true
            }
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn manager(allowed: usize) -> (CooldownManager, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let manager = CooldownManager::new(clock.clone(), 60_000, allowed, 5_000);
        (manager, clock)
    }

    #[tokio::test]
    async fn cools_down_after_allowed_fails_reached() {
        let (mgr, _clock) = manager(3);
        mgr.record_failure("openai").await;
        mgr.record_failure("openai").await;
        assert!(mgr.is_available("openai").await);
        mgr.record_failure("openai").await;
        assert!(!mgr.is_available("openai").await);
    }

    #[tokio::test]
    async fn success_clears_cooldown() {
        let (mgr, _clock) = manager(1);
        mgr.record_failure("anthropic").await;
        assert!(!mgr.is_available("anthropic").await);
        mgr.record_success("anthropic").await;
        assert!(mgr.is_available("anthropic").await);
    }

    #[tokio::test]
    async fn cooldown_expires_after_window() {
        let (mgr, clock) = manager(1);
        mgr.record_failure("google").await;
        assert!(!mgr.is_available("google").await);
        clock.advance(5_001);
        assert!(mgr.is_available("google").await);
    }

    #[tokio::test]
    async fn cooldown_isolation_across_providers() {
        let (mgr, _clock) = manager(1);
        mgr.record_failure("openai").await;
        assert!(!mgr.is_available("openai").await);
        assert!(mgr.is_available("anthropic").await);
    }

    #[tokio::test]
    async fn old_failures_outside_window_are_pruned() {
        let (mgr, clock) = manager(3);
        mgr.record_failure("xai").await;
        clock.advance(61_000);
        mgr.record_failure("xai").await;
        mgr.record_failure("xai").await;
        // Only 2 failures within the current window — below the threshold of 3.
        assert!(mgr.is_available("xai").await);
    }
}
