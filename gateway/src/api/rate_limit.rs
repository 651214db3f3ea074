//! Token-bucket rate limiting middleware, tiered by route class.
//!
//! A single `rate_limit_rpm` budget would treat a `/v1/models` poll the same
//! as a `/v1/messages` completion, even though only the latter ever reaches a
//! paid provider. Buckets are keyed on `(client IP, RouteClass)`: completion
//! routes consume the configured budget directly, lightweight routes
//! (`/health`, `/v1/models`) get a multiplied allowance since SDKs poll them
//! on every startup and they never leave the gateway. Tokens refill steadily
//! at `rpm / 60` tokens/second and the burst cap is `ceil(rpm / 2)` for
//! completion routes — enough to absorb short spikes without allowing
//! runaway bursts. Rate limiting is disabled entirely when `rate_limit_rpm`
//! is absent from the gateway config.
//!
//! When a request is rejected the response includes:
//! - `429 Too Many Requests`
//! - `Retry-After: <seconds>` — exact wait before the bucket has a token again
//! - `X-RateLimit-Limit: <rpm>` — effective limit for this route class
//! - `X-RateLimit-Policy: <N>;w=60` — standard hint: N requests per 60-second window

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::router::RouterState;

/// Lightweight routes get this multiple of the completion-route budget.
const LIGHTWEIGHT_MULTIPLIER: u32 = 5;

/// Which side of the cost line a route falls on: whether it can end up
/// dispatched to a paid provider, or never leaves the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RouteClass {
    /// `/v1/messages`, `/v1/messages/count_tokens`, `/v1/chat/completions` —
    /// may be routed to a provider and billed.
    Completion,
    /// `/v1/models`, `/health`, `/healthz` — served entirely in-process.
    Lightweight,
}

impl RouteClass {
    fn classify(path: &str) -> Self {
        match path {
            "/health" | "/healthz" | "/v1/models" => RouteClass::Lightweight,
            _ => RouteClass::Completion,
        }
    }

    fn rpm(self, base_rpm: u32) -> u32 {
        match self {
            RouteClass::Completion => base_rpm,
            RouteClass::Lightweight => base_rpm.saturating_mul(LIGHTWEIGHT_MULTIPLIER),
        }
    }
}

/// Per-(IP, route class) token bucket state.
#[derive(Debug, Clone)]
struct Bucket {
    /// Timestamp of the last time tokens were refilled.
    last_refill: Instant,
    /// Current token count (fractional to avoid drift).
    tokens: f64,
    /// Token refill rate for this bucket (tokens / second).
    fill_rate: f64,
    /// Maximum bucket capacity (burst allowance).
    capacity: f64,
}

impl Bucket {
    fn fresh(now: Instant, rpm: u32) -> Self {
        let capacity = ((rpm + 1) / 2) as f64; // ceil(rpm / 2)
        Self { last_refill: now, tokens: capacity, fill_rate: rpm as f64 / 60.0, capacity }
    }
}

/// Shared rate limiter: one token bucket per (client IP, route class) pair.
pub struct RateLimiter {
    /// Configured limit in requests per minute for completion routes.
    pub rpm: u32,
    buckets: DashMap<(IpAddr, RouteClass), Bucket>,
}

impl RateLimiter {
    /// Create a new rate limiter for the given completion-route requests-per-minute limit.
    pub fn new(rpm: u32) -> Self {
        Self { rpm, buckets: DashMap::new() }
    }

    /// Attempt to consume one token for `ip` on the given route class.
    ///
    /// Returns `Ok(())` if the request is allowed, or `Err(retry_after_secs)`
    /// if the bucket is empty.
    fn check(&self, ip: IpAddr, class: RouteClass) -> Result<(), f64> {
        let now = Instant::now();
        let effective_rpm = class.rpm(self.rpm);

        let mut bucket = self.buckets.entry((ip, class)).or_insert_with(|| Bucket::fresh(now, effective_rpm));

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let new_tokens = (bucket.tokens + elapsed * bucket.fill_rate).min(bucket.capacity);

        if new_tokens < 1.0 {
            let retry_after = (1.0 - new_tokens) / bucket.fill_rate;
            return Err(retry_after.ceil());
        }

        bucket.last_refill = now;
        bucket.tokens = new_tokens - 1.0;
        Ok(())
    }

    fn capacity_for(&self, class: RouteClass) -> f64 {
        ((class.rpm(self.rpm) + 1) / 2) as f64
    }
}

/// Axum middleware that enforces per-(IP, route class) rate limits.
///
/// No-ops (passes through) when `state.rate_limiter` is `None`.
/// Falls back to `127.0.0.1` if `ConnectInfo` is unavailable (e.g., in tests).
pub async fn rate_limit_middleware(State(state): State<Arc<RouterState>>, req: Request, next: Next) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.ip())
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

        let class = RouteClass::classify(req.uri().path());
        let effective_rpm = class.rpm(limiter.rpm);

        if let Err(retry_after) = limiter.check(ip, class) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("retry-after", retry_after.to_string()),
                    ("x-ratelimit-limit", effective_rpm.to_string()),
                    ("x-ratelimit-policy", format!("{effective_rpm};w=60")),
                    ("content-type", "text/plain".into()),
                ],
                "Rate limit exceeded. Please retry after the indicated delay.",
            )
                .into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, a))
    }

    #[test]
    fn fresh_bucket_allows_up_to_capacity() {
        let limiter = RateLimiter::new(60); // completion capacity = 30
        let test_ip = ip(1);

        let capacity = limiter.capacity_for(RouteClass::Completion) as usize;
        let allowed = (0..capacity).filter(|_| limiter.check(test_ip, RouteClass::Completion).is_ok()).count();

        assert_eq!(allowed, capacity, "expected {capacity} immediate completion requests");
    }

    #[test]
    fn exceeding_capacity_returns_retry_after() {
        let limiter = RateLimiter::new(60);
        let test_ip = ip(2);

        let capacity = limiter.capacity_for(RouteClass::Completion) as usize;
        for _ in 0..capacity {
            let _ = limiter.check(test_ip, RouteClass::Completion);
        }

        let result = limiter.check(test_ip, RouteClass::Completion);
        assert!(result.is_err(), "bucket should be exhausted");
        assert!(result.unwrap_err() >= 1.0, "retry_after must be at least 1 second");
    }

    #[test]
    fn different_ips_have_independent_buckets() {
        let limiter = RateLimiter::new(4); // completion capacity = 2
        let ip_a = ip(10);
        let ip_b = ip(11);

        let _ = limiter.check(ip_a, RouteClass::Completion);
        let _ = limiter.check(ip_a, RouteClass::Completion);

        assert!(limiter.check(ip_b, RouteClass::Completion).is_ok(), "ip_b should be unaffected by ip_a");
    }

    #[test]
    fn lightweight_routes_get_a_wider_budget_than_completion_routes() {
        let limiter = RateLimiter::new(60);
        let test_ip = ip(20);

        let completion_capacity = limiter.capacity_for(RouteClass::Completion) as usize;
        for _ in 0..completion_capacity {
            let _ = limiter.check(test_ip, RouteClass::Completion);
        }
        assert!(limiter.check(test_ip, RouteClass::Completion).is_err(), "completion bucket should be drained");

        // Same IP, lightweight class: independent bucket, much larger capacity.
        assert!(limiter.check(test_ip, RouteClass::Lightweight).is_ok(), "lightweight bucket should be unaffected");
    }

    #[test]
    fn classify_routes_health_and_models_as_lightweight() {
        assert_eq!(RouteClass::classify("/health"), RouteClass::Lightweight);
        assert_eq!(RouteClass::classify("/healthz"), RouteClass::Lightweight);
        assert_eq!(RouteClass::classify("/v1/models"), RouteClass::Lightweight);
        assert_eq!(RouteClass::classify("/v1/messages"), RouteClass::Completion);
        assert_eq!(RouteClass::classify("/v1/chat/completions"), RouteClass::Completion);
    }
}
