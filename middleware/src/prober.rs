//! Periodic `/health` probe, started when the breaker opens.
//!
//! Grounded on the account-cooldown probing idiom in the reference pack's
//! provider-health module (retry-until-healthy against a short per-probe
//! timeout), adapted from per-account state to a single breaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::breaker::CircuitBreaker;

pub const PROBE_INTERVAL: Duration = Duration::from_secs(15);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
}

/// Owns the background probe task; dropping it (or calling [`HealthProber::stop`])
/// cancels the loop without blocking process exit.
pub struct HealthProber {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HealthProber {
    /// Starts polling `health_url` every [`PROBE_INTERVAL`] until the breaker
    /// reports healthy again. A non-200, non-JSON, or `status != "ok"`
    /// response counts as failure and the loop keeps running.
    pub fn spawn(breaker: Arc<CircuitBreaker>, client: reqwest::Client, health_url: String) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROBE_INTERVAL).await;
                if stop_flag.load(Ordering::SeqCst) || breaker.is_healthy() {
                    return;
                }

                if probe_once(&client, &health_url).await {
                    breaker.record_success();
                    return;
                }
            }
        });

        Self { stop, handle: Some(handle) }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for HealthProber {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_once(client: &reqwest::Client, health_url: &str) -> bool {
    let Ok(response) = client.get(health_url).timeout(PROBE_TIMEOUT).send().await else {
        return false;
    };
    if !response.status().is_success() {
        return false;
    }
    match response.json::<HealthBody>().await {
        Ok(body) => body.status.as_deref() == Some("ok"),
        Err(_) => false,
    }
}
