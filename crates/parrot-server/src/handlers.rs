//! Connection handlers for Parrot server.
//!
//! This module handles the connection lifecycle and the HTTP endpoints.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use parrot_core::{EventRouter, RoomId, RouterConfig};
use parrot_transport::{Connection, Inbound, WebSocketConfig, WebSocketSession};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The event router.
    pub router: EventRouter,
    /// Server configuration.
    pub config: Config,
    active_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let router_config = RouterConfig {
            max_text_length: config.limits.max_text_length,
        };

        Self {
            router: EventRouter::with_config(router_config),
            config,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.config.limits.max_message_size,
            heartbeat_interval: self.config.heartbeat.interval(),
        }
    }
}

/// Holds one of the `max_connections` slots until dropped.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let previous = state.active_connections.fetch_add(1, Ordering::AcqRel);
        if previous >= state.config.limits.max_connections {
            state.active_connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the axum application.
pub fn build_app(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler));

    if state.config.admin.enabled {
        info!("Admin endpoints enabled");
        app = app.route("/admin/rooms/:room_id", delete(teardown_handler));
    }

    app.with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Parrot server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Advisory pool and pair sizes.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.waiting_counts())
}

/// End a room without requeueing its members.
async fn teardown_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> StatusCode {
    match state.router.teardown_room(&RoomId::from(room_id)) {
        Some(pair) => {
            info!(room = %pair.room_id, "Room torn down by admin");
            metrics::record_unpairs("admin", 1, 0);
            metrics::set_waiting(state.router.waiting_counts());
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(remote = %remote_addr, "Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, remote_addr, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    remote_addr: SocketAddr,
    state: Arc<AppState>,
    _slot: ConnectionSlot,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let mut session = WebSocketSession::new(socket, Some(remote_addr), &state.websocket_config());
    let connection: Arc<dyn Connection> = session.connection();
    let timeout = state.config.heartbeat.timeout();

    let remote = connection.remote_addr().unwrap_or_default();
    debug!(
        connection = %session.id(),
        remote = %remote,
        active = state.active_connections(),
        "WebSocket connected"
    );

    loop {
        let inbound = match tokio::time::timeout(timeout, session.recv()).await {
            Ok(Ok(Some(inbound))) => inbound,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                warn!(connection = %session.id(), error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            Err(_) => {
                info!(connection = %session.id(), "Heartbeat timeout, closing");
                metrics::record_error("heartbeat_timeout");
                break;
            }
        };

        match inbound {
            Inbound::Text(text) => {
                let start = Instant::now();
                let handled = state.router.handle_text(&connection, &text);
                metrics::record_handled(&handled);
                metrics::set_waiting(state.router.waiting_counts());
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
            Inbound::Heartbeat => {
                trace!(connection = %session.id(), "Heartbeat");
            }
            Inbound::Oversized(_) => metrics::record_drop("oversized"),
        }
    }

    let released = state.router.connection_closed(session.id());
    metrics::record_unpairs("disconnect", released.partners.len(), released.rematched);
    metrics::set_waiting(state.router.waiting_counts());

    debug!(
        connection = %session.id(),
        remote = %remote,
        users = released.users.len(),
        "WebSocket disconnected"
    );
    session.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use parrot_protocol::{codec, Category, ClientEvent, ServerEvent};
    use parrot_core::{notices, UserId};
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        config.metrics.enabled = false;
        config
    }

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let app = build_app(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        (addr, state)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        client
    }

    async fn send(client: &mut Client, event: &ClientEvent) {
        let text = codec::encode_client(event).unwrap();
        client.send(Message::Text(text)).await.unwrap();
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        let deadline = Duration::from_secs(5);
        loop {
            let message = tokio::time::timeout(deadline, client.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return codec::decode_server(&text).unwrap();
            }
        }
    }

    async fn paired(addr: SocketAddr) -> (Client, Client) {
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;

        send(&mut a, &ClientEvent::join("a", "Alice", Category::Female)).await;
        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::searching(notices::SEARCHING)
        );
        send(&mut b, &ClientEvent::join("b", "Bob", Category::Male)).await;

        assert!(matches!(next_event(&mut a).await, ServerEvent::Matched(_)));
        assert!(matches!(next_event(&mut b).await, ServerEvent::Matched(_)));
        (a, b)
    }

    #[tokio::test]
    async fn test_pair_and_relay_over_websocket() {
        let (addr, _state) = spawn_server(test_config()).await;
        let (mut a, mut b) = paired(addr).await;

        send(&mut a, &ClientEvent::message("a", "hi")).await;
        match next_event(&mut b).await {
            ServerEvent::Message(payload) => {
                assert_eq!(payload.from, "a");
                assert_eq!(payload.text, "hi");
            }
            other => panic!("Expected message, got {:?}", other),
        }

        send(&mut b, &ClientEvent::typing("b", true)).await;
        assert_eq!(next_event(&mut a).await, ServerEvent::typing("b", true));
    }

    #[tokio::test]
    async fn test_partner_close_notifies_and_requeues() {
        let (addr, state) = spawn_server(test_config()).await;
        let (mut a, mut b) = paired(addr).await;

        b.close(None).await.unwrap();

        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::partner_disconnected(notices::PARTNER_DISCONNECTED)
        );
        assert!(state.router.is_waiting(&UserId::from("a")));
        assert!(!state.router.is_bound(&UserId::from("b")));
    }

    #[tokio::test]
    async fn test_skip_over_websocket() {
        let (addr, _state) = spawn_server(test_config()).await;
        let (mut a, mut b) = paired(addr).await;

        send(&mut a, &ClientEvent::skip("a")).await;

        assert_eq!(
            next_event(&mut b).await,
            ServerEvent::partner_disconnected(notices::PARTNER_SKIPPED)
        );
        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::searching(notices::SEARCHING_AGAIN)
        );
    }

    #[tokio::test]
    async fn test_malformed_envelope_keeps_connection_open() {
        let (addr, _state) = spawn_server(test_config()).await;
        let mut a = connect(addr).await;

        a.send(Message::Text("{garbage".to_string())).await.unwrap();
        a.send(Message::Text(r#"{"event":"dance","payload":{}}"#.to_string()))
            .await
            .unwrap();
        send(&mut a, &ClientEvent::join("a", "Alice", Category::Male)).await;

        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::searching(notices::SEARCHING)
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_dropped_and_connection_stays_usable() {
        let mut config = test_config();
        config.limits.max_message_size = 256;
        let (addr, state) = spawn_server(config).await;
        let mut a = connect(addr).await;

        // Valid envelope padded past the frame limit
        let big = codec::encode_client(&ClientEvent::join("big", "Big", Category::Female)).unwrap();
        let padded = format!("{big}{}", " ".repeat(1024));
        a.send(Message::Text(padded)).await.unwrap();
        send(&mut a, &ClientEvent::join("a", "Alice", Category::Male)).await;

        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::searching(notices::SEARCHING)
        );
        assert!(!state.router.is_bound(&UserId::from("big")));
        assert!(state.router.is_waiting(&UserId::from("a")));
    }

    #[tokio::test]
    async fn test_legacy_join_is_accepted() {
        let (addr, _state) = spawn_server(test_config()).await;
        let mut a = connect(addr).await;

        let legacy = r#"{"event":"joinQueue","payload":{"userId":"a","username":"Alice","gender":"female","premium":false}}"#;
        a.send(Message::Text(legacy.to_string())).await.unwrap();

        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::searching(notices::SEARCHING)
        );
    }

    #[tokio::test]
    async fn test_connection_limit_refuses_upgrade() {
        let mut config = test_config();
        config.limits.max_connections = 0;
        let (addr, state) = spawn_server(config).await;

        assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
        assert_eq!(state.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_silent_connection_times_out() {
        let mut config = test_config();
        config.heartbeat.interval_ms = 60_000;
        config.heartbeat.timeout_ms = 200;
        let (addr, state) = spawn_server(config).await;
        let mut a = connect(addr).await;

        send(&mut a, &ClientEvent::join("a", "Alice", Category::Male)).await;
        next_event(&mut a).await;
        assert!(state.router.is_waiting(&UserId::from("a")));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!state.router.is_waiting(&UserId::from("a")));
        assert!(!state.router.is_bound(&UserId::from("a")));
        assert_eq!(state.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_stats_and_teardown_handlers() {
        let mut config = test_config();
        config.admin.enabled = true;
        let (addr, state) = spawn_server(config).await;
        let (mut a, mut b) = paired(addr).await;

        let stats = stats_handler(State(Arc::clone(&state))).await.into_response();
        let body = axum::body::to_bytes(stats.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"male": 0, "female": 0, "pairs": 1}));

        let room_id = state
            .router
            .pair_by_user(&UserId::from("a"))
            .unwrap()
            .room_id
            .to_string();
        let status = teardown_handler(State(Arc::clone(&state)), Path(room_id.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let status = teardown_handler(State(Arc::clone(&state)), Path(room_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let closed = ServerEvent::partner_disconnected(notices::ROOM_CLOSED);
        assert_eq!(next_event(&mut a).await, closed);
        assert_eq!(next_event(&mut b).await, closed);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
