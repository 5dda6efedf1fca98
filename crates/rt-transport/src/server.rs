//! WebSocket transport server using Axum.
//!
//! Handles HTTP upgrade to WebSocket, per-connection read/write loops, and
//! the administrative HTTP routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, Utf8Bytes, WebSocket},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use rt_protocol::ServerMessage;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::{AdminError, TransportError};
use crate::handle::{CloseRequest, ConnectionHandle, ConnectionId};

/// Trait implemented by the realtime server to react to socket events.
/// The transport calls it for every connection lifecycle step and frame.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A socket was upgraded. The handler takes ownership of the handle;
    /// dropping it closes the socket.
    fn on_open(&self, handle: ConnectionHandle);

    /// A text frame arrived.
    fn on_frame(&self, id: &ConnectionId, text: &str) -> impl std::future::Future<Output = ()> + Send;

    /// A transport-level ping or pong arrived (liveness only).
    fn on_keepalive(&self, id: &ConnectionId);

    /// The socket is gone. Called exactly once per opened connection.
    fn on_close(&self, id: &ConnectionId);

    /// Aggregate stats served by `GET /health`.
    fn health(&self) -> serde_json::Value;

    /// Inject a message from the admin surface. Returns the delivery count.
    fn admin_broadcast(
        &self,
        channel: Option<&str>,
        message: ServerMessage,
    ) -> Result<usize, rt_protocol::RealtimeError>;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Enable permissive CORS on the HTTP routes
    pub enable_cors: bool,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Outbound frames buffered per connection before sends start failing
    pub outbound_queue_size: usize,
    /// Bearer token required by `POST /broadcast`; the route is disabled without one
    pub admin_token: Option<SecretString>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            hostname: "127.0.0.1".into(),
            enable_cors: false,
            max_connections: Some(1024),
            outbound_queue_size: 256,
            admin_token: None,
        }
    }
}

/// Body of `POST /broadcast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Target channel; everyone when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub delivered: usize,
}

/// Shared state for the transport server.
struct AppState<H: ConnectionHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    /// Reserved socket slots (enforces `max_connections`)
    client_count: Arc<AtomicUsize>,
}

/// One reserved connection slot. Taken before the upgrade and released on
/// drop, so a rejected or failed upgrade gives its slot back.
struct ConnectionSlot {
    count: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn reserve(count: &Arc<AtomicUsize>, max: Option<usize>) -> Option<Self> {
        let previous = count.fetch_add(1, Ordering::AcqRel);
        let slot = Self { count: count.clone() };
        match max {
            Some(max) if previous >= max => None,
            _ => Some(slot),
        }
    }

    /// Slots currently held, this one included.
    fn held(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accepts sockets and serves the admin routes.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Bind and start serving with the given handler.
    pub async fn start<H: ConnectionHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let enable_cors = config.enable_cors;

        let state = Arc::new(AppState {
            handler,
            config,
            client_count: Arc::new(AtomicUsize::new(0)),
        });

        let mut app = Router::new()
            .route("/ws", get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .route("/broadcast", post(broadcast_handler::<H>))
            .with_state(state);
        if enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Realtime transport listening on ws://{local_addr}/ws");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the serve task.
    /// Open sockets should be closed through the handler first.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Realtime transport stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: ConnectionHandler>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    let Some(slot) = ConnectionSlot::reserve(&state.client_count, state.config.max_connections)
    else {
        warn!(
            "Connection rejected: max connections reached ({})",
            state.config.max_connections.unwrap_or_default()
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, slot))
        .into_response()
}

async fn health_handler<H: ConnectionHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(state.handler.health())
}

async fn broadcast_handler<H: ConnectionHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, AdminError> {
    check_admin_token(&headers, state.config.admin_token.as_ref())?;

    let delivered = state
        .handler
        .admin_broadcast(request.channel.as_deref(), request.message)
        .map_err(|e| AdminError::BadRequest(e.to_string()))?;

    Ok(Json(BroadcastResponse { delivered }))
}

fn check_admin_token(
    headers: &HeaderMap,
    expected: Option<&SecretString>,
) -> Result<(), AdminError> {
    let expected = expected.ok_or(AdminError::Disabled)?;
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AdminError::MissingToken)?;

    if presented.is_empty() {
        return Err(AdminError::MissingToken);
    }
    if presented != expected.expose_secret() {
        return Err(AdminError::InvalidToken);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: ConnectionHandler>(
    socket: WebSocket,
    state: Arc<AppState<H>>,
    slot: ConnectionSlot,
) {
    let conn_id = ConnectionId::generate();
    info!(%conn_id, total = slot.held(), "Client connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(state.config.outbound_queue_size.max(1));
    let (close_tx, close_rx) = watch::channel(None);

    state
        .handler
        .on_open(ConnectionHandle::new(conn_id.clone(), frames_tx, close_tx));

    let mut writer = tokio::spawn(write_loop(conn_id.clone(), ws_tx, frames_rx, close_rx));

    loop {
        tokio::select! {
            // Incoming WebSocket message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.handler.on_frame(&conn_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // axum answers transport pings itself
                        state.handler.on_keepalive(&conn_id);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(%conn_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%conn_id, "Client closed the socket");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            // Writer finished: server-side close or a failed write
            _ = &mut writer => {
                debug!(%conn_id, "Writer finished");
                break;
            }
        }
    }

    state.handler.on_close(&conn_id);

    // Give the writer a moment to flush a pending close frame
    if !writer.is_finished() {
        let _ = tokio::time::timeout(Duration::from_millis(500), &mut writer).await;
        writer.abort();
    }

    drop(slot);
    info!(%conn_id, "Client disconnected (total: {})", state.client_count.load(Ordering::Acquire));
}

/// Drains the outbound queue into the socket until a close is requested,
/// every handle is dropped, or a write fails.
async fn write_loop(
    conn_id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Utf8Bytes>,
    mut close_rx: watch::Receiver<Option<CloseRequest>>,
) {
    loop {
        tokio::select! {
            biased;

            _ = close_rx.changed() => {
                let request = close_rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| CloseRequest::going_away("connection released"));
                debug!(%conn_id, code = request.code, reason = %request.reason, "Closing socket");
                let _ = sink.send(Message::Close(Some(request.into_frame()))).await;
                break;
            }

            frame = frames.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(%conn_id, error = %e, "Failed to write frame");
                            break;
                        }
                    }
                    None => {
                        let request = CloseRequest::going_away("connection released");
                        let _ = sink.send(Message::Close(Some(request.into_frame()))).await;
                        break;
                    }
                }
            }
        }
    }
}
