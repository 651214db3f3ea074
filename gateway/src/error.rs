//! Unified error taxonomy for the routing pipeline.
//!
//! Every fallible pipeline operation returns `Result<T, AppError>`. Unlike a
//! single-bucket `AppError(anyhow::Error)` wrapper that collapses everything
//! to 500, [`AppError`] here carries a stable [`AppErrorKind`] tag so the
//! HTTP frontend can map errors to status codes without string-matching the
//! message — "unknown model" is a 400 to the client and must never be
//! confused with a 500 from a flaky upstream.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

/// Stable error classification, independent of the human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppErrorKind {
    /// Malformed JSON, missing `model`/`messages`, body over the size limit.
    InvalidRequest,
    /// Alias resolution failed in passthrough mode.
    UnknownModel,
    /// No Anthropic auth on `/v1/messages`.
    MissingAuth,
    /// A non-Anthropic upstream has no resolvable API key.
    MissingProviderKey,
    /// The selected provider is in cooldown.
    ProviderCooled,
    /// The upstream responded with a non-2xx status; body is forwarded verbatim.
    ProviderError { status: StatusCode, body: String },
    /// Timeout, DNS failure, connection reset, or similar transport failure.
    NetworkError,
    /// Rejected by an external policy collaborator.
    PolicyDenied,
    /// An external policy collaborator requires human approval before proceeding.
    ApprovalRequired,
    /// Authentication was explicitly denied by an external collaborator.
    AuthDenied,
    /// The cascade plan was exhausted without a usable response.
    CascadeExhausted,
    /// Anything else.
    Internal,
}

/// A classified, HTTP-mappable error.
#[derive(Debug)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::InvalidRequest, message)
    }

    pub fn unknown_model(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            kind: AppErrorKind::UnknownModel,
            message: message.into(),
            suggestions,
        }
    }

    pub fn missing_auth(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::MissingAuth, message)
    }

    pub fn missing_provider_key(env_var: &str) -> Self {
        Self::new(
            AppErrorKind::MissingProviderKey,
            format!("no API key configured; set the `{env_var}` environment variable"),
        )
    }

    pub fn provider_cooled(provider: &str) -> Self {
        Self::new(
            AppErrorKind::ProviderCooled,
            format!("provider `{provider}` is cooling down after recent failures"),
        )
    }

    pub fn provider_error(status: StatusCode, body: String) -> Self {
        Self {
            kind: AppErrorKind::ProviderError { status, body },
            message: format!("upstream returned HTTP {status}"),
            suggestions: Vec::new(),
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::NetworkError, format!("provider error: {}", message.into()))
    }

    pub fn cascade_exhausted(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::CascadeExhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Internal, message)
    }

    fn status(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            AppErrorKind::UnknownModel => StatusCode::BAD_REQUEST,
            AppErrorKind::MissingAuth => StatusCode::UNAUTHORIZED,
            AppErrorKind::MissingProviderKey => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::ProviderCooled => StatusCode::SERVICE_UNAVAILABLE,
            AppErrorKind::ProviderError { status, .. } => *status,
            AppErrorKind::NetworkError => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::PolicyDenied | AppErrorKind::ApprovalRequired | AppErrorKind::AuthDenied => {
                StatusCode::FORBIDDEN
            }
            AppErrorKind::CascadeExhausted => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        if let AppErrorKind::ProviderError { body, .. } = &self.kind {
            // Upstream error bodies are forwarded verbatim, never re-wrapped.
            if let Ok(parsed) = serde_json::from_str::<Value>(body) {
                return parsed;
            }
            return json!({ "error": body });
        }

        let mut obj = json!({ "error": self.message });
        if !self.suggestions.is_empty() {
            obj["suggestions"] = json!(self.suggestions);
        }
        obj
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = ?self.kind, error = %self.message, "pipeline error");
        } else {
            tracing::debug!(kind = ?self.kind, error = %self.message, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::network_error(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::invalid_request(format!("invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_carries_suggestions_in_body() {
        let err = AppError::unknown_model(
            "unknown model `gpt-5-turbo`",
            vec!["gpt-4o".into(), "gpt-4o-mini".into()],
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let body = err.body();
        assert_eq!(body["suggestions"][0], "gpt-4o");
    }

    #[test]
    fn provider_error_forwards_upstream_body_verbatim() {
        let err = AppError::provider_error(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"rate limited"}"#.into());
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body()["error"], "rate limited");
    }

    #[test]
    fn provider_error_wraps_non_json_body() {
        let err = AppError::provider_error(StatusCode::BAD_GATEWAY, "plain text failure".into());
        assert_eq!(err.body()["error"], "plain text failure");
    }

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(AppError::invalid_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::missing_auth("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::missing_provider_key("X").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::provider_cooled("openai").status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::network_error("timeout").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::cascade_exhausted("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::internal("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
