//! Client configuration.

use std::time::Duration;

use crate::backoff::Backoff;
use crate::outbox::OverflowPolicy;

/// Connection options for `ConnectionManager`.
///
/// ```rust,ignore
/// let config = ClientConfig::new("ws://127.0.0.1:8787/ws")
///     .with_token("dev-token")
///     .with_max_reconnect_attempts(5)
///     .with_outbox(50, OverflowPolicy::DropOldest);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://host:port/ws`
    pub url: String,
    /// Bearer token re-sent after every successful open
    pub token: Option<String>,
    /// Reconnect delay schedule
    pub backoff: Backoff,
    /// Reconnect attempts after an unclean close before giving up.
    /// `0` disables automatic reconnection.
    pub max_reconnect_attempts: u32,
    /// Application-level ping interval. `Duration::ZERO` disables pings.
    pub ping_interval: Duration,
    /// How long to wait for a matching `pong` before treating the socket as dead
    pub pong_timeout: Duration,
    /// Limit on the WebSocket handshake
    pub connect_timeout: Duration,
    /// Queue messages sent while disconnected
    pub queue_offline: bool,
    /// Offline outbox capacity
    pub outbox_capacity: usize,
    /// What happens when the outbox is full
    pub overflow_policy: OverflowPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787/ws".into(),
            token: None,
            backoff: Backoff::default(),
            max_reconnect_attempts: 10,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            queue_offline: true,
            outbox_capacity: 100,
            overflow_policy: OverflowPolicy::RejectNew,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_offline_queue(mut self, enabled: bool) -> Self {
        self.queue_offline = enabled;
        self
    }

    pub fn with_outbox(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.outbox_capacity = capacity;
        self.overflow_policy = policy;
        self
    }
}
