//! HTTP-facing modules: the client listener, the control listener, and the
//! middleware shared by both (rate limiting). Request-id generation and
//! propagation is handled by `tower_http::request_id` directly in `main`.

pub mod client;
pub mod control;
pub mod health;
pub mod metrics;
pub mod rate_limit;
