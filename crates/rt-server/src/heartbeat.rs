//! Server-side liveness: answers pings and evicts silent connections.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rt_protocol::ServerMessage;
use rt_transport::{CloseRequest, ConnectionId, close_code};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;

pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            timeout,
            task: Mutex::new(None),
        }
    }

    /// Refresh the connection's liveness and build the `pong` reply.
    pub fn record_ping(&self, id: &ConnectionId, timestamp: Option<i64>) -> ServerMessage {
        self.registry.touch(id);
        ServerMessage::pong(timestamp)
    }

    /// Evict every connection silent for longer than the timeout as of
    /// `now`. Returns the evicted ids.
    pub fn sweep(&self, now: Instant) -> Vec<ConnectionId> {
        sweep_registry(&self.registry, now, self.timeout)
    }

    /// Start the periodic sweep. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let registry = self.registry.clone();
        let interval = self.interval;
        let timeout = self.timeout;
        info!(?interval, ?timeout, "Heartbeat monitor started");

        *task = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_registry(&registry, Instant::now(), timeout);
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Heartbeat monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_registry(
    registry: &ConnectionRegistry,
    now: Instant,
    timeout: Duration,
) -> Vec<ConnectionId> {
    let stale = registry.stale_connections(now, timeout);
    for id in &stale {
        warn!(conn_id = %id, "Evicting silent connection");
        registry.close_connection(id, CloseRequest::new(close_code::AWAY, HEARTBEAT_TIMEOUT_REASON));
    }
    stale
}
