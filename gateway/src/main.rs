use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderName, Request};
use tokio::signal;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use relayplane_gateway::{api, config::Config, router, traffic::TrafficLog};

/// `X-Request-ID` generator: accepts the caller's id if already set upstream
/// of this layer, otherwise mints a fresh UUID v4. Ties `/control/stats`,
/// server logs, and the client response together under one identifier.
#[derive(Clone, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relayplane_gateway=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("RELAYPLANE_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/etc/relayplane/config.toml"));

    let config = Config::load(&config_path).with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(client_port = config.gateway.client_port, control_port = config.gateway.control_port, "relayplane gateway starting");

    let body_limit_bytes = config.gateway.body_limit_bytes;
    let traffic_log = Arc::new(TrafficLog::new(config.gateway.traffic_log_capacity));
    let config = Arc::new(config);
    let state = Arc::new(router::RouterState::new(Arc::clone(&config), Arc::clone(&traffic_log)));

    let client_addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.client_port).parse()?;
    let control_addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.control_port).parse()?;

    info!(%client_addr, "client listener binding");
    info!(%control_addr, "control listener binding");

    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    let control_listener = tokio::net::TcpListener::bind(control_addr).await?;

    let request_id_header = HeaderName::from_static("x-request-id");

    let trace_layer = || {
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request<axum::body::Body>| {
                let id = req.extensions().get::<RequestId>().and_then(|id| id.header_value().to_str().ok()).unwrap_or("-");
                tracing::info_span!("request", method = %req.method(), path = %req.uri().path(), request_id = %id)
            })
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };
    let request_id_layers = || {
        tower::ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(request_id_header.clone(), MakeRequestUuid))
            .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
    };

    let client_app = api::client::router(Arc::clone(&state), body_limit_bytes)
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), api::rate_limit::rate_limit_middleware))
        .layer(trace_layer())
        .layer(request_id_layers());
    let control_app = api::control::router(Arc::clone(&state)).layer(trace_layer()).layer(request_id_layers());

    tokio::select! {
        result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("client listener error")?;
        }
        result = axum::serve(control_listener, control_app) => {
            result.context("control listener error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `relayplane-gateway --healthcheck` from a Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("RELAYPLANE_CLIENT_PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(4801);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
