//! Proxy-first, fallback-on-failure request routing for the embedded
//! middleware — distinct from `relayplane_gateway::routing`, which picks a
//! *model*. This picks a *transport*: try the local gateway proxy, fall back
//! to the host's own direct call when the breaker says the proxy is unhealthy
//! or the proxy call itself fails.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::stats::StatsCollector;

#[derive(Debug, Clone)]
pub struct DirectRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct RouteResponse {
    pub status: u16,
    pub body: Value,
    pub via_proxy: bool,
}

pub struct MiddlewareRouterConfig {
    pub enabled: bool,
    pub proxy_base_url: String,
    pub request_timeout: Duration,
}

pub struct MiddlewareRouter {
    config: MiddlewareRouterConfig,
    clock: Arc<dyn Clock>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<StatsCollector>,
    client: reqwest::Client,
}

impl MiddlewareRouter {
    pub fn new(config: MiddlewareRouterConfig, clock: Arc<dyn Clock>, breaker: Arc<CircuitBreaker>, stats: Arc<StatsCollector>) -> Self {
        let client = reqwest::Client::builder().timeout(config.request_timeout).build().unwrap_or_default();
        Self { config, clock, breaker, stats, client }
    }

    /// `direct_send` is the host's own call path — always available, never
    /// instrumented by the breaker. The proxy path is only attempted while
    /// the breaker reports healthy; any proxy failure falls back to it.
    pub async fn route(&self, request: DirectRequest, direct_send: impl FnOnce(&DirectRequest) -> RouteResponse) -> RouteResponse {
        let t0 = self.clock.now_ms();

        if !self.config.enabled || !self.breaker.is_healthy() {
            let response = direct_send(&request);
            self.record(t0, false, &response);
            return response;
        }

        match self.try_proxy(&request).await {
            Ok(response) => {
                self.breaker.record_success();
                self.record(t0, true, &response);
                response
            }
            Err(()) => {
                self.breaker.record_failure();
                let response = direct_send(&request);
                self.record(t0, false, &response);
                response
            }
        }
    }

    async fn try_proxy(&self, request: &DirectRequest) -> Result<RouteResponse, ()> {
        let url = format!("{}{}", self.config.proxy_base_url.trim_end_matches('/'), request.path);
        let builder = self
            .client
            .request(request.method.parse().map_err(|_| ())?, url)
            .timeout(self.config.request_timeout)
            .json(&request.body);

        let response = builder.send().await.map_err(|_| ())?;
        let status = response.status().as_u16();
        if status >= 500 {
            return Err(());
        }
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(RouteResponse { status, body, via_proxy: true })
    }

    fn record(&self, t0: i64, via_proxy: bool, response: &RouteResponse) {
        let latency_ms = (self.clock.now_ms() - t0).max(0) as u64;
        self.stats.record_request(latency_ms, via_proxy, response.status < 500);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn router(proxy_base_url: &str, threshold: u32) -> MiddlewareRouter {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let breaker = Arc::new(CircuitBreaker::new(clock.clone(), threshold, 30_000));
        let stats = Arc::new(StatsCollector::new(clock.clone(), crate::stats::DEFAULT_WINDOW_MS));
        let config = MiddlewareRouterConfig { enabled: true, proxy_base_url: proxy_base_url.to_string(), request_timeout: Duration::from_millis(1_000) };
        MiddlewareRouter::new(config, clock, breaker, stats)
    }

    fn direct_response(_req: &DirectRequest) -> RouteResponse {
        RouteResponse { status: 200, body: serde_json::json!({"direct": true}), via_proxy: false }
    }

    #[tokio::test]
    async fn s3_middleware_fallback_on_unreachable_proxy() {
        let router = router("http://127.0.0.1:19999", 2);
        let request = DirectRequest { method: "POST".to_string(), path: "/v1/messages".to_string(), body: serde_json::json!({}) };

        let first = router.route(request.clone(), direct_response).await;
        assert!(!first.via_proxy);
        assert_eq!(first.body, serde_json::json!({"direct": true}));

        let second = router.route(request.clone(), direct_response).await;
        assert!(!second.via_proxy);

        assert_eq!(router.breaker.state(), crate::breaker::BreakerState::Open);

        let third = router.route(request, direct_response).await;
        assert!(!third.via_proxy);

        let stats = router.stats.get_stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.direct_requests, 3);
        assert_eq!(stats.proxied_requests, 0);
    }

    #[tokio::test]
    async fn disabled_router_always_goes_direct() {
        let mut router = router("http://127.0.0.1:19999", 100);
        router.config.enabled = false;
        let request = DirectRequest { method: "GET".to_string(), path: "/health".to_string(), body: Value::Null };
        let response = router.route(request, direct_response).await;
        assert!(!response.via_proxy);
    }
}
