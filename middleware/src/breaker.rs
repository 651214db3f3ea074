//! Three-state circuit breaker: the middleware's half of the reliability
//! story (the gateway's [`crate`]-sibling equivalent is
//! `relayplane_gateway::cooldown::CooldownManager`, which tracks providers
//! rather than a single upstream proxy).
//!
//! `OPEN -> HALF-OPEN` is observed lazily: nothing schedules a timer, a call
//! to [`CircuitBreaker::state`] just compares `now` against `opened_at +
//! reset_timeout_ms` whenever it's asked.

use std::sync::{Arc, Mutex};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF-OPEN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StateChange {
    pub from: BreakerState,
    pub to: BreakerState,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<i64>,
}

/// Observer slot for breaker transitions — a single callback, not a bus.
pub type Observer = Box<dyn Fn(StateChange) + Send + Sync>;

pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    failure_threshold: u32,
    reset_timeout_ms: i64,
    inner: Mutex<Inner>,
    observer: Mutex<Option<Observer>>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>, failure_threshold: u32, reset_timeout_ms: i64) -> Self {
        Self {
            clock,
            failure_threshold,
            reset_timeout_ms,
            inner: Mutex::new(Inner { state: BreakerState::Closed, failure_count: 0, opened_at: None }),
            observer: Mutex::new(None),
        }
    }

    /// Registers the single transition observer, replacing any previous one.
    pub fn set_observer(&self, observer: Observer) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(StateChange { from, to });
        }
    }

    /// Applies the lazy `OPEN -> HALF-OPEN` check and returns the current state.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if self.clock.now_ms() - opened_at >= self.reset_timeout_ms {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                }
            }
        }
        inner.state
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.state(), BreakerState::Closed | BreakerState::HalfOpen)
    }

    /// Any success, in any state, closes the breaker and clears the count.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.opened_at = None;
        self.transition(&mut inner, BreakerState::Closed);
    }

    /// A failure from HALF-OPEN re-opens immediately; a failure in CLOSED
    /// trips to OPEN only once `failure_count` reaches the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.failure_count = self.failure_threshold;
                inner.opened_at = Some(self.clock.now_ms());
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {
                // Already open; a stray failure while probing doesn't restart the clock.
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.opened_at = Some(self.clock.now_ms());
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.opened_at = None;
        self.transition(&mut inner, BreakerState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, reset_ms: i64) -> (CircuitBreaker, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        (CircuitBreaker::new(clock.clone(), threshold, reset_ms), clock)
    }

    #[test]
    fn trips_at_exactly_the_threshold() {
        let (breaker, _clock) = breaker(3, 30_000);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn success_clears_failure_count() {
        let (breaker, _clock) = breaker(3, 30_000);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn s1_breaker_trip_sequence() {
        let (breaker, clock) = breaker(3, 30_000);
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        breaker.set_observer(Box::new(move |change| sink.lock().unwrap().push((change.from, change.to))));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.is_healthy());

        clock.advance(30_000);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.is_healthy());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);

        let recorded = transitions.lock().unwrap();
        assert_eq!(
            *recorded,
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }

    #[test]
    fn half_open_failure_reopens() {
        let (breaker, clock) = breaker(2, 1_000);
        breaker.record_failure();
        breaker.record_failure();
        clock.advance(1_000);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn reset_forces_closed() {
        let (breaker, _clock) = breaker(1, 1_000);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn observer_is_called_once_per_transition() {
        let (breaker, _clock) = breaker(1, 1_000);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        breaker.set_observer(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
