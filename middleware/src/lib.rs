//! `relayplane_middleware` — client-side circuit breaking, health probing,
//! child-process supervision, and proxy/direct-call routing for embedding the
//! RelayPlane gateway in a host agent process.
//!
//! Unlike `relayplane_gateway`, this crate is not meant to run standalone: a
//! host process constructs a [`Middleware`], wires it into its own request
//! path via [`Middleware::route`], and calls [`Middleware::destroy`] on
//! shutdown so the prober and supervisor timers don't outlive it.

pub mod breaker;
pub mod clock;
pub mod prober;
pub mod router;
pub mod stats;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use breaker::CircuitBreaker;
use clock::{Clock, SystemClock};
use prober::HealthProber;
use router::{DirectRequest, MiddlewareRouter, MiddlewareRouterConfig, RouteResponse};
use stats::{Stats, StatsCollector, DEFAULT_WINDOW_MS};
use supervisor::{Supervisor, SupervisorConfig};

/// Reads the embedding process's environment for proxy target + config path
/// overrides. Each field falls back to the gateway's own default if unset.
pub struct MiddlewareEnv {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub config_path: Option<String>,
    pub quality_model: Option<String>,
}

impl MiddlewareEnv {
    pub fn from_env() -> Self {
        Self {
            proxy_host: std::env::var("RELAYPLANE_PROXY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            proxy_port: std::env::var("RELAYPLANE_PROXY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(4801),
            config_path: std::env::var("RELAYPLANE_CONFIG_PATH").ok(),
            quality_model: std::env::var("RELAYPLANE_QUALITY_MODEL").ok(),
        }
    }

    pub fn proxy_base_url(&self) -> String {
        format!("http://{}:{}", self.proxy_host, self.proxy_port)
    }
}

pub struct MiddlewareConfig {
    pub enabled: bool,
    pub proxy_base_url: String,
    pub request_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout_ms: i64,
    pub stats_window_ms: i64,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            proxy_base_url: MiddlewareEnv::from_env().proxy_base_url(),
            request_timeout: Duration::from_secs(3),
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            stats_window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

/// Owns the breaker, stats collector, prober, and (optional) supervisor.
/// Cyclic by reference only — the supervisor holds a pointer back to the
/// breaker to record a failure on crash, but `Middleware` is the sole owner
/// of all four and tears them down together in [`Middleware::destroy`].
pub struct Middleware {
    breaker: Arc<CircuitBreaker>,
    stats: Arc<StatsCollector>,
    router: MiddlewareRouter,
    prober: std::sync::Mutex<Option<HealthProber>>,
    supervisor: Option<Arc<Supervisor>>,
    client: reqwest::Client,
    health_url: String,
}

impl Middleware {
    pub fn new(config: MiddlewareConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let breaker = Arc::new(CircuitBreaker::new(clock.clone(), config.breaker_failure_threshold, config.breaker_reset_timeout_ms));
        let stats = Arc::new(StatsCollector::new(clock.clone(), config.stats_window_ms));

        let stats_sink = stats.clone();
        breaker.set_observer(Box::new(move |change| stats_sink.record_state_transition(change.from, change.to)));

        let health_url = format!("{}/health", config.proxy_base_url.trim_end_matches('/'));
        let router_config = MiddlewareRouterConfig { enabled: config.enabled, proxy_base_url: config.proxy_base_url, request_timeout: config.request_timeout };
        let router = MiddlewareRouter::new(router_config, clock, breaker.clone(), stats.clone());

        Self {
            breaker,
            stats,
            router,
            prober: std::sync::Mutex::new(None),
            supervisor: None,
            client: reqwest::Client::new(),
            health_url,
        }
    }

    pub fn with_supervisor(mut self, config: SupervisorConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        self.supervisor = Some(Supervisor::new(config, clock, self.breaker.clone()));
        self
    }

    pub async fn route(&self, request: DirectRequest, direct_send: impl FnOnce(&DirectRequest) -> RouteResponse) -> RouteResponse {
        let before = self.breaker.state();
        let response = self.router.route(request, direct_send).await;
        let after = self.breaker.state();
        if before != breaker::BreakerState::Open && after == breaker::BreakerState::Open {
            self.start_prober();
        }
        response
    }

    fn start_prober(&self) {
        let mut prober = self.prober.lock().unwrap();
        *prober = Some(HealthProber::spawn(self.breaker.clone(), self.client.clone(), self.health_url.clone()));
    }

    pub fn get_stats(&self) -> Stats {
        self.stats.get_stats()
    }

    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.as_ref()
    }

    /// Tears down the prober and supervisor; safe to call more than once.
    pub fn destroy(&self) {
        *self.prober.lock().unwrap() = None;
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop();
        }
    }
}

impl Drop for Middleware {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middleware_env_defaults_when_unset() {
        // Host processes may set these; we only assert the fallback shape here.
        let env = MiddlewareEnv { proxy_host: "127.0.0.1".to_string(), proxy_port: 4801, config_path: None, quality_model: None };
        assert_eq!(env.proxy_base_url(), "http://127.0.0.1:4801");
    }

    #[tokio::test]
    async fn opening_the_breaker_starts_a_prober() {
        let config = MiddlewareConfig {
            enabled: true,
            proxy_base_url: "http://127.0.0.1:19999".to_string(),
            request_timeout: Duration::from_millis(200),
            breaker_failure_threshold: 1,
            breaker_reset_timeout_ms: 30_000,
            stats_window_ms: DEFAULT_WINDOW_MS,
        };
        let middleware = Middleware::new(config);
        let request = DirectRequest { method: "POST".to_string(), path: "/v1/messages".to_string(), body: serde_json::json!({}) };
        let _ = middleware.route(request, |_| RouteResponse { status: 200, body: serde_json::json!({"direct": true}), via_proxy: false }).await;

        assert!(!middleware.is_healthy());
        assert!(middleware.prober.lock().unwrap().is_some());
    }
}
