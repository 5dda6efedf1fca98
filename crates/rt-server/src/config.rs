//! Realtime server configuration.

use std::time::Duration;

/// Heartbeat settings for the server side.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How often the heartbeat monitor sweeps for silent connections
    pub heartbeat_interval: Duration,
    /// Silence after which a connection is evicted
    pub heartbeat_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Upper bound on how long a silent connection survives.
    pub fn max_silence(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_timeout
    }
}
