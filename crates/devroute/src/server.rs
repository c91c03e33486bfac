//! Axum HTTP server: route table, routing handler, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DevrouteConfig;
use crate::contract::{CONTRACT_HEADER, MATCHED_HEADER};
use crate::error::RouteError;
use crate::proxy::forward::{self, Inbound};
use crate::proxy::route::resolve_backend;
use crate::ranges::PrivateRanges;

/// Liveness probe path.
pub const HEALTH_PATH: &str = "/_healthz";

/// Shared application state. Immutable once built.
#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub ranges: Arc<PrivateRanges>,
    pub response_timeout: Duration,
}

impl AppState {
    pub fn from_config(config: &DevrouteConfig) -> anyhow::Result<Self> {
        let client = forward::build_client(Duration::from_secs(config.forward.connect_timeout_secs))?;
        Ok(Self {
            client,
            ranges: Arc::new(PrivateRanges::new(config.forward.allow_loopback)),
            response_timeout: Duration::from_secs(config.forward.response_timeout_secs),
        })
    }
}

/// Build the route table: the liveness probe, and the routing handler for
/// every other path and method.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, any(handle_health))
        .fallback(handle_route)
        .with_state(Arc::new(state))
}

/// Bind the listener and serve until SIGINT/SIGTERM.
pub async fn run(config: &DevrouteConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = build_router(state);

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "devroute listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("devroute shut down gracefully");
    Ok(())
}

/// Routing handler for every path other than the liveness probe.
///
/// 1. Open the request span with the routing headers as sent
/// 2. Validate the contract and resolve the backend (no I/O)
/// 3. Forward to the backend and relay its response
/// 4. Record exactly one outcome event, here for rejections and in the
///    relayed body for forwards
async fn handle_route(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let upstream = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("");
    let span = devroute_tracing::devroute_request_span!(
        Uuid::new_v4(),
        parts.method,
        parts.uri,
        upstream,
        header_text(&parts.headers, CONTRACT_HEADER),
        header_text(&parts.headers, MATCHED_HEADER)
    );
    let start = Instant::now();

    async move {
        let result = match resolve_backend(&parts.headers, &state.ranges) {
            Ok(backend) => {
                let inbound = Inbound {
                    client_addr: parts
                        .extensions
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| *addr),
                    method: parts.method,
                    uri: parts.uri,
                    headers: parts.headers,
                    body,
                };
                forward::forward(&state.client, &backend, inbound, state.response_timeout).await
            }
            Err(e) => Err(e),
        };

        let response = match result {
            // The relayed body logs the outcome event once the stream ends
            Ok(response) => response,
            Err(e) => {
                log_rejection(&e);
                tracing::Span::current().record("outcome", e.outcome().as_str());
                e.into_response()
            }
        };

        let span = tracing::Span::current();
        span.record("status", response.status().as_u16());
        span.record("latency_ms", start.elapsed().as_millis() as u64);
        response
    }
    .instrument(span)
    .await
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn log_rejection(err: &RouteError) {
    let outcome = err.outcome();
    match err {
        RouteError::BackendUnavailable { reason } => {
            tracing::error!(outcome = %outcome, error = %reason, "http: proxy error");
        }
        RouteError::ForbiddenDestination { host } => {
            tracing::error!(
                outcome = %outcome,
                host = %host,
                "Refused to proxy request to non-private IP"
            );
        }
        other => {
            tracing::error!(outcome = %outcome, error = %other, "Rejected request");
        }
    }
}

/// Liveness probe: always 200 "OK", independent of routing.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
