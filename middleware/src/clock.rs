//! Millisecond clock abstraction, mirroring the gateway's `clock` module.
//!
//! The two crates don't share a dependency edge, so this is a small
//! independent copy of the same idiom rather than a re-export — keeping the
//! breaker/prober/stats deterministic under test matters here just as much as
//! it does for the gateway's cooldown manager.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct FakeClock {
    now: std::sync::atomic::AtomicI64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { now: std::sync::atomic::AtomicI64::new(0) }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}
