//! HTTP handlers for the Courier server.
//!
//! This module handles the connection lifecycle: credential check before the
//! upgrade, then a session registered with the hub for the lifetime of the
//! socket.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Metered};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use courier_core::{parse_bearer, Admission, Gateway, Hub, KeyDirectory};
use courier_protocol::WireFormat;
use courier_transport::websocket;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Authenticates connections and registers their sessions.
    pub gateway: Gateway,
    /// Public key directory.
    pub keys: Arc<dyn KeyDirectory>,
    /// Server configuration.
    pub config: Config,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Create new app state and start the hub.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the key table is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let keys = config.key_directory().context("Failed to load public keys")?;
        let (hub, _task) = Hub::spawn(config.hub_config());
        let gateway = Gateway::new(
            hub,
            Arc::new(config.auth.validator()),
            config.gateway_config(),
        );

        Ok(Self {
            gateway,
            keys: Arc::new(keys),
            config,
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    fn try_acquire_slot(&self) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                connections: Arc::clone(&self.connections),
            })
    }
}

/// One unit of the connection limit, released on drop.
struct ConnectionSlot {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Bearer token, for clients that cannot set headers.
    pub token: Option<String>,
    /// Outbound wire format: `json` (default) or `msgpack`.
    pub format: Option<String>,
    /// Deprecated. Ignored; the identity always comes from the token.
    pub username: Option<String>,
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/keys/:identity", get(keys_handler))
        .with_state(state)
}

/// Serve on a bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.auth.uses_development_secret() {
        warn!("Using the built-in development token secret; set auth.secret for production");
    }

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config)?);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await?;

    info!("Courier server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.gateway.hub().snapshot().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": stats.sessions,
            "connections": state.connection_count(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// Public key lookup handler.
async fn keys_handler(
    Path(identity): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.keys.lookup(&identity) {
        Ok(key) => Json(serde_json::json!({
            "username": identity,
            "publicKey": STANDARD.encode(&key),
        }))
        .into_response(),
        Err(e) => {
            debug!(identity = %identity, error = %e, "Key lookup failed");
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn credential<'a>(params: &'a ConnectParams, headers: &'a HeaderMap) -> Option<&'a str> {
    params
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_bearer)
        })
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(username) = &params.username {
        warn!(username = %username, "Ignoring deprecated username parameter");
    }

    let admission = match state.gateway.admit(credential(&params, &headers)) {
        Ok(admission) => admission,
        Err(e) => {
            warn!(error = %e, "Rejected connection");
            metrics::record_auth_failure();
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let format = match params.format.as_deref().map(str::parse::<WireFormat>) {
        None => WireFormat::default(),
        Some(Ok(format)) => format,
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let Some(slot) = state.try_acquire_slot() else {
        warn!(identity = %admission.identity(), "Connection limit reached");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, admission, format, slot))
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    admission: Admission,
    format: WireFormat,
    _slot: ConnectionSlot,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();
    let identity = admission.identity().clone();

    debug!(identity = %identity, format = %format, "WebSocket connected");

    let (reader, writer) = websocket::split(socket, state.config.limits.max_message_size);
    match state
        .gateway
        .attach(admission, Metered::new(reader), Metered::new(writer), format)
        .await
    {
        Ok(tasks) => tasks.join().await,
        Err(e) => {
            error!(identity = %identity, error = %e, "Failed to register session");
            metrics::record_error("hub");
        }
    }

    debug!(identity = %identity, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_prefers_query_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer header-token".parse().unwrap());

        let params = ConnectParams {
            token: Some("query-token".into()),
            ..ConnectParams::default()
        };
        assert_eq!(credential(&params, &headers), Some("query-token"));

        let params = ConnectParams {
            token: Some(String::new()),
            ..ConnectParams::default()
        };
        assert_eq!(credential(&params, &headers), Some("header-token"));

        assert_eq!(credential(&ConnectParams::default(), &HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = Config {
            limits: crate::config::LimitsConfig {
                max_connections: 1,
                ..Default::default()
            },
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();

        let slot = state.try_acquire_slot().unwrap();
        assert!(state.try_acquire_slot().is_none());
        assert_eq!(state.connection_count(), 1);

        drop(slot);
        assert_eq!(state.connection_count(), 0);
        assert!(state.try_acquire_slot().is_some());
    }
}
