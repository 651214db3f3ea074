//! Upstream dispatcher: per-provider endpoint and auth-header assembly,
//! request forwarding, and per-request timeout enforcement.
//!
//! Mirrors the teacher's dual-client split (one client carrying a fixed
//! timeout for buffered calls, one with no client-level timeout so SSE
//! streams aren't cut off mid-read — the per-request deadline for streams is
//! instead enforced on the time-to-first-byte).

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::dialect::anthropic::ANTHROPIC_VERSION;
use crate::error::AppError;
use crate::model_registry::Provider;

pub struct Dispatcher {
    buffered: reqwest::Client,
    streaming: reqwest::Client,
}

impl Dispatcher {
    pub fn new(request_timeout_ms: u64) -> Self {
        let buffered = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .expect("reqwest client");
        let streaming = reqwest::Client::builder().build().expect("reqwest client");
        Self { buffered, streaming }
    }

    pub fn endpoint(&self, provider: Provider, model: &str, stream: bool, config: &Config) -> Result<String, AppError> {
        let base = config.base_url(provider);
        Ok(match provider {
            Provider::Anthropic => base.unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string()),
            Provider::OpenAi => base.unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            Provider::Xai => base.unwrap_or_else(|| "https://api.x.ai/v1/chat/completions".to_string()),
            Provider::Moonshot => base.unwrap_or_else(|| "https://api.moonshot.cn/v1/chat/completions".to_string()),
            Provider::Google => {
                let base = base.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
                let method = if stream { "streamGenerateContent" } else { "generateContent" };
                let key = config.api_key(Provider::Google).ok_or_else(|| AppError::missing_provider_key(&config.api_key_env(Provider::Google)))?;
                format!("{base}/models/{model}:{method}?key={key}")
            }
            Provider::Local => base.ok_or_else(|| AppError::internal("no base_url configured for the `local` provider"))?,
        })
    }

    /// Builds the auth + passthrough headers for `provider`.
    ///
    /// `incoming` carries the caller's own `Authorization`/`x-api-key`/
    /// `anthropic-*` headers, used for Anthropic OAuth-style passthrough.
    pub fn build_headers(&self, provider: Provider, model: &str, config: &Config, incoming: &HeaderMap) -> Result<HeaderMap, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match provider {
            Provider::Anthropic => {
                if let Some(auth) = incoming.get(AUTHORIZATION).or_else(|| incoming.get("x-api-key")) {
                    // OAuth/API-key passthrough takes priority over configured env keys.
                    if incoming.get(AUTHORIZATION).is_some() {
                        headers.insert(AUTHORIZATION, auth.clone());
                    } else {
                        headers.insert(HeaderName::from_static("x-api-key"), auth.clone());
                    }
                } else {
                    let key = hybrid_anthropic_key(config, model)?;
                    if key.starts_with("sk-ant-oat") {
                        let value = format!("Bearer {key}");
                        headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).map_err(|e| AppError::internal(e.to_string()))?);
                    } else {
                        headers.insert(HeaderName::from_static("x-api-key"), HeaderValue::from_str(&key).map_err(|e| AppError::internal(e.to_string()))?);
                    }
                }
                headers.insert(
                    HeaderName::from_static("anthropic-version"),
                    incoming.get("anthropic-version").cloned().unwrap_or_else(|| HeaderValue::from_static(ANTHROPIC_VERSION)),
                );
                if let Some(beta) = incoming.get("anthropic-beta") {
                    headers.insert(HeaderName::from_static("anthropic-beta"), beta.clone());
                }
            }
            Provider::Google => {
                // Auth travels in the query string (`?key=`); no header needed.
            }
            Provider::OpenAi | Provider::Xai | Provider::Moonshot => {
                let key = config.api_key(provider).ok_or_else(|| AppError::missing_provider_key(&config.api_key_env(provider)))?;
                let value = format!("Bearer {key}");
                headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).map_err(|e| AppError::internal(e.to_string()))?);
            }
            Provider::Local => {
                if let Some(key) = config.api_key(provider) {
                    let value = format!("Bearer {key}");
                    headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).map_err(|e| AppError::internal(e.to_string()))?);
                }
            }
        }

        Ok(headers)
    }

    pub async fn send_buffered(&self, url: &str, headers: HeaderMap, body: Value) -> Result<Value, AppError> {
        let response = self.buffered.post(url).headers(headers).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::provider_error(status, text));
        }
        serde_json::from_str(&text).map_err(AppError::from)
    }

    pub async fn send_stream(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Value,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, AppError> {
        let response = self.streaming.post(url).headers(headers).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::provider_error(status, text));
        }
        Ok(response.bytes_stream())
    }
}

fn hybrid_anthropic_key(config: &Config, model: &str) -> Result<String, AppError> {
    if let Some(pattern) = &config.auth.use_max_for_models {
        if let Ok(re) = regex::Regex::new(pattern) {
            if re.is_match(model) {
                if let Ok(max_token) = std::env::var("ANTHROPIC_MAX_TOKEN") {
                    return Ok(max_token);
                }
            }
        }
    }
    config.api_key(Provider::Anthropic).ok_or_else(|| AppError::missing_provider_key(&config.api_key_env(Provider::Anthropic)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_endpoint_requires_api_key() {
        let dispatcher = Dispatcher::new(30_000);
        let config = Config::default();
        std::env::remove_var("GEMINI_API_KEY");
        let result = dispatcher.endpoint(Provider::Google, "gemini-1.5-pro", false, &config);
        assert!(result.is_err());
    }

    #[test]
    fn google_endpoint_selects_stream_method() {
        let dispatcher = Dispatcher::new(30_000);
        let config = Config::default();
        std::env::set_var("GEMINI_API_KEY", "test-key");
        let url = dispatcher.endpoint(Provider::Google, "gemini-1.5-pro", true, &config).unwrap();
        assert!(url.contains("streamGenerateContent"));
        std::env::remove_var("GEMINI_API_KEY");
    }

    #[test]
    fn anthropic_incoming_authorization_header_takes_priority() {
        let dispatcher = Dispatcher::new(30_000);
        let config = Config::default();
        let mut incoming = HeaderMap::new();
        incoming.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-ant-oat-passthrough"));
        let headers = dispatcher.build_headers(Provider::Anthropic, "claude-3-5-sonnet-20241022", &config, &incoming).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-ant-oat-passthrough");
    }

    #[test]
    fn missing_openai_key_errors_with_env_var_name() {
        let dispatcher = Dispatcher::new(30_000);
        let config = Config::default();
        std::env::remove_var("OPENAI_API_KEY");
        let err = dispatcher.build_headers(Provider::OpenAi, "gpt-4o", &config, &HeaderMap::new()).unwrap_err();
        assert!(err.message.contains("OPENAI_API_KEY"));
    }
}
