//! Realtime server: owns the registry and routes client frames.

use std::sync::Arc;

use parking_lot::Mutex;
use rt_protocol::{ClientMessage, ErrorCode, RealtimeError, ServerMessage, validate_channel};
use rt_transport::{CloseRequest, ConnectionHandle, ConnectionHandler, ConnectionId, close_code};
use tracing::{debug, info, warn};

use crate::auth::{AuthGate, ChannelPolicy, TokenValidator};
use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Uninitialized,
    Running,
    Shutdown,
}

impl ServerState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Running => "running",
            Self::Shutdown => "shutdown",
        }
    }
}

/// The realtime server. Owns the connection registry, the broadcaster,
/// the heartbeat monitor, and the auth gate.
pub struct RealtimeServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    heartbeat: HeartbeatMonitor,
    auth: AuthGate,
    state: Mutex<ServerState>,
}

impl RealtimeServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let heartbeat = HeartbeatMonitor::new(
            registry.clone(),
            config.heartbeat_interval,
            config.heartbeat_timeout,
        );

        Self {
            config,
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            heartbeat,
            auth: AuthGate::new(),
            state: Mutex::new(ServerState::Uninitialized),
        }
    }

    /// Install the token validator used by `authenticate` frames.
    pub fn with_validator<V: TokenValidator>(mut self, validator: V) -> Self {
        self.auth.set_validator(validator);
        self
    }

    pub fn with_channel_policy<P: ChannelPolicy>(mut self, policy: P) -> Self {
        self.auth.set_policy(policy);
        self
    }

    /// Start the heartbeat monitor and accept connections.
    pub fn init(&self) {
        let mut state = self.state.lock();
        if *state == ServerState::Running {
            return;
        }
        self.heartbeat.start();
        *state = ServerState::Running;
        info!(
            auth = self.auth.has_validator(),
            heartbeat_interval = ?self.config.heartbeat_interval,
            heartbeat_timeout = ?self.config.heartbeat_timeout,
            "Realtime server initialized"
        );
    }

    /// Stop the heartbeat monitor and close every connection.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ServerState::Shutdown {
                return;
            }
            *state = ServerState::Shutdown;
        }

        info!("Shutting down realtime server...");
        self.heartbeat.stop();
        let closed = self
            .registry
            .close_all(CloseRequest::going_away("server shutting down"));
        info!(closed, "Realtime server shutdown complete");
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == ServerState::Running
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle for emitting domain events.
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Process one inbound text frame.
    pub async fn handle_frame(&self, id: &ConnectionId, text: &str) {
        self.registry.touch(id);
        self.registry.record_received();

        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Malformed client frame");
                self.reply(
                    id,
                    ServerMessage::error(ErrorCode::InvalidMessage, format!("invalid message: {e}")),
                );
                return;
            }
        };
        debug!(conn_id = %id, kind = message.kind(), "Client frame");

        match message {
            ClientMessage::Ping { timestamp } => {
                let pong = self.heartbeat.record_ping(id, timestamp);
                self.reply(id, pong);
            }
            ClientMessage::Authenticate { token } => {
                let reply = self.auth.authenticate(&self.registry, id, &token).await;
                self.reply(id, reply);
            }
            ClientMessage::Subscribe { channel } => self.subscribe(id, &channel),
            ClientMessage::Unsubscribe { channel } => self.unsubscribe(id, &channel),
        }
    }

    fn subscribe(&self, id: &ConnectionId, channel: &str) {
        if let Err(e) = validate_channel(channel) {
            self.reply(id, ServerMessage::error(ErrorCode::InvalidChannel, e.to_string()));
            return;
        }
        if !self.auth.may_subscribe(&self.registry, id, channel) {
            warn!(conn_id = %id, channel, "Anonymous subscribe to restricted channel");
            self.reply(
                id,
                ServerMessage::error(
                    ErrorCode::Unauthorized,
                    format!("channel '{channel}' requires authentication"),
                ),
            );
            return;
        }
        if let Err(e) = self.registry.subscribe(id, channel) {
            debug!(conn_id = %id, error = %e, "Subscribe after close");
        }
    }

    fn unsubscribe(&self, id: &ConnectionId, channel: &str) {
        if let Err(e) = validate_channel(channel) {
            self.reply(id, ServerMessage::error(ErrorCode::InvalidChannel, e.to_string()));
            return;
        }
        self.registry.unsubscribe(id, channel);
    }

    fn reply(&self, id: &ConnectionId, message: ServerMessage) {
        if let Err(e) = self.broadcaster.send_to(id, &message) {
            debug!(conn_id = %id, kind = message.kind(), error = %e, "Reply dropped");
        }
    }
}

impl ConnectionHandler for RealtimeServer {
    fn on_open(&self, handle: ConnectionHandle) {
        if !self.is_running() {
            handle.close(CloseRequest::new(close_code::AGAIN, "server not running"));
            return;
        }
        self.registry.add_connection(handle);
    }

    async fn on_frame(&self, id: &ConnectionId, text: &str) {
        self.handle_frame(id, text).await;
    }

    fn on_keepalive(&self, id: &ConnectionId) {
        self.registry.touch(id);
    }

    fn on_close(&self, id: &ConnectionId) {
        self.registry.remove_connection(id);
    }

    fn health(&self) -> serde_json::Value {
        let stats = self.registry.stats();
        serde_json::json!({
            "status": if self.is_running() { "ok" } else { "unavailable" },
            "state": self.state.lock().as_str(),
            "authEnabled": self.auth.has_validator(),
            "stats": stats,
        })
    }

    fn admin_broadcast(
        &self,
        channel: Option<&str>,
        message: ServerMessage,
    ) -> Result<usize, RealtimeError> {
        match channel {
            Some(channel) => {
                validate_channel(channel)?;
                Ok(self.broadcaster.broadcast_to_channel(channel, &message))
            }
            None => Ok(self.broadcaster.broadcast_to_all(&message)),
        }
    }
}
