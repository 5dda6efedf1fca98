//! Connection registry: live connections and channel membership.
//!
//! Both maps live behind one lock so a connection and its channel entries
//! are always updated together. Senders take a snapshot of the target
//! handles and release the lock before writing to any socket.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rt_transport::{CloseRequest, ConnectionHandle, ConnectionId};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection not found: {0}")]
    NotFound(ConnectionId),
}

/// One live connection.
struct Connection {
    handle: ConnectionHandle,
    authenticated: bool,
    user_id: Option<String>,
    channels: HashSet<String>,
    connected_at: Instant,
    last_ping_at: Instant,
}

/// Point-in-time copy of a connection's bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub channels: Vec<String>,
    pub connected_at: Instant,
    pub last_ping_at: Instant,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    /// channel → members; a channel exists only while it has members
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl Inner {
    fn leave_channel(&mut self, id: &ConnectionId, channel: &str) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }
}

#[derive(Default)]
struct Throughput {
    received: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    broadcasts: AtomicU64,
}

/// Aggregate numbers served by `/health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub connections: usize,
    pub authenticated: usize,
    /// Member count per channel
    pub channels: BTreeMap<String, usize>,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub broadcasts: u64,
    pub uptime_secs: u64,
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    throughput: Throughput,
    started_at: Instant,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            throughput: Throughput::default(),
            started_at: Instant::now(),
        }
    }

    /// Register a freshly opened socket as anonymous with no subscriptions.
    pub fn add_connection(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = handle.id().clone();
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.connections.insert(
            id.clone(),
            Connection {
                handle,
                authenticated: false,
                user_id: None,
                channels: HashSet::new(),
                connected_at: now,
                last_ping_at: now,
            },
        );
        info!(conn_id = %id, total = inner.connections.len(), "Connection registered");
        id
    }

    /// Remove a connection and every channel entry that references it.
    /// Removing an unknown id is a no-op.
    pub fn remove_connection(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let removed = {
            let mut inner = self.inner.lock();
            let conn = inner.connections.remove(id)?;
            for channel in &conn.channels {
                inner.leave_channel(id, channel);
            }
            conn
        };
        debug!(conn_id = %id, "Connection removed");
        // The handle is dropped here, outside the lock, releasing the socket.
        Some(info_of(id, &removed))
    }

    /// Send a close frame and remove the connection.
    pub fn close_connection(&self, id: &ConnectionId, request: CloseRequest) -> bool {
        let handle = self.inner.lock().connections.get(id).map(|c| c.handle.clone());
        match handle {
            Some(handle) => {
                handle.close(request);
                self.remove_connection(id);
                true
            }
            None => false,
        }
    }

    /// Add `channel` to the connection's subscriptions. Returns `false` if it
    /// was already subscribed.
    pub fn subscribe(&self, id: &ConnectionId, channel: &str) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock();
        let conn = inner
            .connections
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if !conn.channels.insert(channel.to_string()) {
            return Ok(false);
        }
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id.clone());
        debug!(conn_id = %id, channel, "Subscribed");
        Ok(true)
    }

    /// Drop `channel` from the connection's subscriptions. Returns `false`
    /// if the connection is unknown or was not subscribed.
    pub fn unsubscribe(&self, id: &ConnectionId, channel: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(conn) = inner.connections.get_mut(id) else {
            return false;
        };
        if !conn.channels.remove(channel) {
            return false;
        }
        inner.leave_channel(id, channel);
        debug!(conn_id = %id, channel, "Unsubscribed");
        true
    }

    /// Mark a connection authenticated as `user_id`.
    pub fn set_authenticated(&self, id: &ConnectionId, user_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(id) {
            Some(conn) => {
                conn.authenticated = true;
                conn.user_id = Some(user_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn is_authenticated(&self, id: &ConnectionId) -> bool {
        self.inner
            .lock()
            .connections
            .get(id)
            .is_some_and(|c| c.authenticated)
    }

    /// Record inbound traffic on a connection.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        self.touch_at(id, Instant::now())
    }

    pub fn touch_at(&self, id: &ConnectionId, at: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(id) {
            Some(conn) => {
                conn.last_ping_at = at;
                true
            }
            None => false,
        }
    }

    /// Connections silent for longer than `timeout` as of `now`.
    pub fn stale_connections(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .connections
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_ping_at) > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn handle(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.inner.lock().connections.get(id).map(|c| c.handle.clone())
    }

    /// Handles of every member of `channel`.
    pub fn channel_snapshot(&self, channel: &str) -> Vec<ConnectionHandle> {
        let inner = self.inner.lock();
        let Some(members) = inner.channels.get(channel) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .map(|c| c.handle.clone())
            .collect()
    }

    /// Handles of every live connection.
    pub fn all_snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner
            .lock()
            .connections
            .values()
            .map(|c| c.handle.clone())
            .collect()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.inner.lock().connections.get(id).map(|c| info_of(id, c))
    }

    pub fn channel_size(&self, channel: &str) -> usize {
        self.inner.lock().channels.get(channel).map_or(0, HashSet::len)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every connection with `request` and empty the registry.
    pub fn close_all(&self, request: CloseRequest) -> usize {
        let drained: Vec<Connection> = {
            let mut inner = self.inner.lock();
            inner.channels.clear();
            inner.connections.drain().map(|(_, c)| c).collect()
        };
        for conn in &drained {
            conn.handle.close(request.clone());
        }
        drained.len()
    }

    // ── Throughput counters ─────────────────────────────────────────────

    pub fn record_received(&self) {
        self.throughput.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, sent: usize, failed: usize) {
        self.throughput.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.throughput.sent.fetch_add(sent as u64, Ordering::Relaxed);
        self.throughput.failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_direct(&self, ok: bool) {
        let counter = if ok { &self.throughput.sent } else { &self.throughput.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            connections: inner.connections.len(),
            authenticated: inner.connections.values().filter(|c| c.authenticated).count(),
            channels: inner
                .channels
                .iter()
                .map(|(name, members)| (name.clone(), members.len()))
                .collect(),
            messages_received: self.throughput.received.load(Ordering::Relaxed),
            messages_sent: self.throughput.sent.load(Ordering::Relaxed),
            messages_failed: self.throughput.failed.load(Ordering::Relaxed),
            broadcasts: self.throughput.broadcasts.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

fn info_of(id: &ConnectionId, conn: &Connection) -> ConnectionInfo {
    let mut channels: Vec<String> = conn.channels.iter().cloned().collect();
    channels.sort();
    ConnectionInfo {
        id: id.clone(),
        authenticated: conn.authenticated,
        user_id: conn.user_id.clone(),
        channels,
        connected_at: conn.connected_at,
        last_ping_at: conn.last_ping_at,
    }
}
