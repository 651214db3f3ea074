//! Configuration types for the routing gateway.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. The hot-reload file-watch
//! loop that feeds a new [`Config`] into the running server is an external
//! collaborator — not implemented here — but the struct it would swap in is.
//!
//! # Example
//! ```toml
//! [gateway]
//! client_port = 4801
//!
//! [providers.anthropic]
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [routing]
//! mode = "cascade"
//! cascade_enabled = true
//! cascade = ["anthropic/claude-3-5-haiku-20241022", "anthropic/claude-3-5-sonnet-20241022"]
//!
//! [routing.complexity]
//! simple = "anthropic/claude-3-5-haiku-20241022"
//! complex = "anthropic/claude-3-5-sonnet-20241022"
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::model_registry::Provider;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Per-provider credentials/overrides, keyed by the closed provider set
    /// (`anthropic`, `openai`, `google`, `xai`, `moonshot`, `local`).
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            routing: RoutingConfig::default(),
            reliability: ReliabilityConfig::default(),
            providers: HashMap::new(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for provider_name in self.providers.keys() {
            anyhow::ensure!(
                Provider::parse(provider_name).is_some(),
                "providers.{} is not a known provider (anthropic, openai, google, xai, moonshot, local)",
                provider_name
            );
        }

        if self.routing.mode == RoutingMode::Cascade && self.routing.cascade_enabled {
            anyhow::ensure!(!self.routing.cascade.is_empty(), "routing.cascade must be non-empty when cascade mode is enabled");
            anyhow::ensure!(
                self.routing.max_escalations < self.routing.cascade.len(),
                "routing.max_escalations must be less than the cascade plan length"
            );
        }

        Ok(())
    }

    /// Looks up a configured provider's API key environment variable, falling
    /// back to the well-known env var for that provider.
    pub fn api_key_env(&self, provider: Provider) -> String {
        self.providers
            .get(provider.as_str())
            .and_then(|p| p.api_key_env.clone())
            .unwrap_or_else(|| default_env_var(provider).to_string())
    }

    pub fn api_key(&self, provider: Provider) -> Option<String> {
        std::env::var(self.api_key_env(provider)).ok()
    }

    pub fn base_url(&self, provider: Provider) -> Option<String> {
        self.providers.get(provider.as_str()).and_then(|p| p.base_url.clone())
    }
}

fn default_env_var(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Google => "GEMINI_API_KEY",
        Provider::Xai => "XAI_API_KEY",
        Provider::Moonshot => "MOONSHOT_API_KEY",
        Provider::Local => "",
    }
}

/// Core listener settings — client-facing routing port and the separate
/// control-plane port, mirroring the client/admin port split.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port for `/v1/messages`, `/v1/chat/completions`, `/health` (default: 4801).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Port for `/control/*` (default: 4802).
    #[serde(default = "defaults::control_port")]
    pub control_port: u16,

    /// Host to bind both listeners to (default: 127.0.0.1).
    #[serde(default = "defaults::host")]
    pub host: String,

    /// Maximum accepted JSON body size in bytes (default: 10 MiB).
    #[serde(default = "defaults::body_limit_bytes")]
    pub body_limit_bytes: usize,

    /// Per-upstream-request timeout in milliseconds (default: 30 000).
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum requests per minute per client IP on the client port. Unset
    /// or zero disables rate limiting.
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,

    /// Number of recent requests to keep in the in-memory traffic log (default: 500).
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_port: defaults::client_port(),
            control_port: defaults::control_port(),
            host: defaults::host(),
            body_limit_bytes: defaults::body_limit_bytes(),
            request_timeout_ms: defaults::request_timeout_ms(),
            rate_limit_rpm: None,
            traffic_log_capacity: defaults::traffic_log_capacity(),
            log_level: None,
        }
    }
}

/// How the router chooses between single-target and cascade target selection
/// under `auto` mode.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    #[default]
    Direct,
    Cascade,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub mode: RoutingMode,

    #[serde(default)]
    pub cascade_enabled: bool,

    /// Ordered cascade plan, cheapest model first.
    #[serde(default)]
    pub cascade: Vec<String>,

    #[serde(default = "defaults::max_escalations")]
    pub max_escalations: usize,

    /// Complexity/routing-mode tier → model id (`"simple"`, `"moderate"`,
    /// `"complex"`, `"cost"`, `"fast"`, `"quality"`).
    #[serde(default)]
    pub complexity: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { mode: RoutingMode::default(), cascade_enabled: false, cascade: Vec::new(), max_escalations: defaults::max_escalations(), complexity: HashMap::new() }
    }
}

impl RoutingConfig {
    pub fn complexity_tier(&self, tier: &str) -> Option<String> {
        self.complexity.get(tier).cloned()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReliabilityConfig {
    #[serde(default = "defaults::cooldown_window_ms")]
    pub cooldown_window_ms: i64,

    #[serde(default = "defaults::cooldown_allowed_fails")]
    pub cooldown_allowed_fails: usize,

    #[serde(default = "defaults::cooldown_duration_ms")]
    pub cooldown_duration_ms: i64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            cooldown_window_ms: defaults::cooldown_window_ms(),
            cooldown_allowed_fails: defaults::cooldown_allowed_fails(),
            cooldown_duration_ms: defaults::cooldown_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,
}

/// Hybrid Anthropic auth: when the chosen model matches `use_max_for_models`
/// and a MAX (`sk-ant-oat*`) token is available, prefer it over the
/// configured API key.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub use_max_for_models: Option<String>,
}

mod defaults {
    pub fn client_port() -> u16 { 4801 }
    pub fn control_port() -> u16 { 4802 }
    pub fn host() -> String { "127.0.0.1".to_string() }
    pub fn body_limit_bytes() -> usize { 10 * 1024 * 1024 }
    pub fn request_timeout_ms() -> u64 { 30_000 }
    pub fn traffic_log_capacity() -> usize { 500 }
    pub fn max_escalations() -> usize { 1 }
    pub fn cooldown_window_ms() -> i64 { 60_000 }
    pub fn cooldown_allowed_fails() -> usize { 3 }
    pub fn cooldown_duration_ms() -> i64 { 30_000 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [providers.anthropic]
            api_key_env = "ANTHROPIC_API_KEY"

            [routing]
            mode = "cascade"
            cascade_enabled = true
            cascade = ["anthropic/claude-3-5-haiku-20241022", "anthropic/claude-3-5-sonnet-20241022"]

            [routing.complexity]
            simple = "anthropic/claude-3-5-haiku-20241022"
            complex = "anthropic/claude-3-5-sonnet-20241022"
            "#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn parses_minimal_config() {
        let config = minimal_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.mode, RoutingMode::Cascade);
        assert_eq!(config.routing.cascade.len(), 2);
    }

    #[test]
    fn validation_rejects_unknown_provider_key() {
        let mut config = minimal_config();
        config.providers.insert("bogus".into(), ProviderConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_cascade_mode_with_empty_plan() {
        let mut config = minimal_config();
        config.routing.cascade.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_max_escalations_at_or_above_plan_length() {
        let mut config = minimal_config();
        config.routing.max_escalations = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn gateway_defaults_are_applied_when_section_is_absent() {
        let config: Config = toml::from_str("").expect("empty config should parse with defaults");
        assert_eq!(config.gateway.client_port, 4801);
        assert_eq!(config.gateway.control_port, 4802);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.body_limit_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn api_key_env_falls_back_to_well_known_var() {
        let config = Config::default();
        assert_eq!(config.api_key_env(Provider::Anthropic), "ANTHROPIC_API_KEY");
        assert_eq!(config.api_key_env(Provider::OpenAi), "OPENAI_API_KEY");
    }

    #[test]
    fn api_key_env_honors_explicit_override() {
        let mut config = Config::default();
        config.providers.insert("anthropic".into(), ProviderConfig { api_key_env: Some("CUSTOM_KEY".into()), base_url: None });
        assert_eq!(config.api_key_env(Provider::Anthropic), "CUSTOM_KEY");
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
