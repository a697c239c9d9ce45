//! `BeaconServer`: Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use beacon_core::CloseReason;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::{Collaborators, Hub};
use crate::websocket::{handler, session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection context.
    pub hub: Arc<Hub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Upgrade limit.
    pub max_connections: usize,
    /// Largest accepted WebSocket message.
    pub max_message_size: usize,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Beacon server.
pub struct BeaconServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl BeaconServer {
    /// Create a server with the built-in collaborators.
    pub fn new(config: ServerConfig) -> Self {
        let collaborators = Collaborators::for_config(&config);
        Self::with_collaborators(config, collaborators)
    }

    /// Create a server with custom collaborators.
    pub fn with_collaborators(config: ServerConfig, collaborators: Collaborators) -> Self {
        let hub = Arc::new(Hub::new(&config, collaborators));
        Self {
            config,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind and serve in a background task.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let join = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = result {
                error!(error = %err, "server terminated");
            }
        });

        info!(
            %addr,
            path = %self.config.path,
            beat_interval_ms = self.config.beat_interval.as_millis(),
            protocols = ?self.hub.protocols().tags(),
            "beacon server listening"
        );
        Ok(ServerHandle { addr, join })
    }

    /// Stop accepting upgrades and close every connection with
    /// `server_restart`. Returns the number of connections closed.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.shutdown();
        let closed = self.hub.close_all(CloseReason::ServerRestart).await;
        info!(closed, "server shut down");
        closed
    }

    /// Connection context.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle to a listening server.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `ws://` URL for `path` on the bound address.
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    /// Wait for the serve task to finish.
    pub async fn stopped(self) {
        if let Err(err) = self.join.await {
            error!(error = %err, "serve task failed");
        }
    }
}

/// GET {path}: WebSocket upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let protocol = match handler::admit(
        &state.hub,
        &headers,
        state.max_connections,
        state.shutdown.is_shutting_down(),
    )
    .await
    {
        Ok(protocol) => protocol,
        Err(rejection) => return rejection.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let identifiers = state.hub.identity().identify(&query);
    let hub = state.hub.clone();
    ws.protocols([protocol.tag.clone()])
        .max_message_size(state.max_message_size)
        .on_upgrade(move |socket| session::serve_socket(hub, socket, protocol, identifiers))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.registry().count().await;
    let beat_ms = u64::try_from(state.hub.beat_interval().as_millis()).unwrap_or(u64::MAX);
    Json(health::health_check(
        state.start_time,
        connections,
        beat_ms,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use beacon_core::{Identifiers, NegotiatedProtocol};
    use tower::ServiceExt;

    fn make_server() -> BeaconServer {
        BeaconServer::new(ServerConfig::default())
    }

    fn upgrade_request(protocols: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/cable?user_id=7")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(value) = protocols {
            builder = builder.header("sec-websocket-protocol", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["beat_interval_ms"], 3000);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upgrade_without_protocol_header_rejected() {
        let server = make_server();
        let resp = server.router().oneshot(upgrade_request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upgrade_with_unknown_protocol_rejected() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(upgrade_request(Some("proto-v2-json")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("proto-v2-json"));
    }

    #[tokio::test]
    async fn upgrade_refused_while_shutting_down() {
        let server = make_server();
        let _ = server.shutdown().await;
        let resp = server
            .router()
            .oneshot(upgrade_request(Some("beacon-v1.2-json")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn shutdown_closes_registered_connections() {
        let server = make_server();
        let (conn, mut rx) = server
            .hub()
            .open(NegotiatedProtocol::legacy(), Identifiers::new())
            .await;
        conn.activate().unwrap();

        assert_eq!(server.shutdown().await, 1);
        assert!(server.coordinator().is_shutting_down());
        assert_eq!(conn.close_reason(), Some(CloseReason::ServerRestart));

        let mut last = None;
        while let Ok(item) = rx.try_recv() {
            last = Some(item);
        }
        assert_eq!(
            last,
            Some(crate::websocket::Outbound::Close(CloseReason::ServerRestart))
        );
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let handle = server.listen().await.unwrap();
        assert!(handle.port() > 0);
        assert!(handle.ws_url("/cable").starts_with("ws://127.0.0.1:"));
        let _ = server.shutdown().await;
        handle.stopped().await;
    }
}
