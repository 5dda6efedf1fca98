//! Inbound frame parsing and listener fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rt_protocol::ServerMessage;
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Returned by `on_message`; pass it to `remove_listener` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventDispatcher {
    last: Mutex<Option<ServerMessage>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Callbacks run on the connection task, in
    /// registration order, and must not block.
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Parse a text frame and dispatch it. Malformed and unknown frames are
    /// logged and dropped.
    pub fn dispatch_text(&self, text: &str) -> Option<ServerMessage> {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => {
                self.dispatch(&message);
                Some(message)
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropping unparseable server frame");
                None
            }
        }
    }

    pub fn dispatch(&self, message: &ServerMessage) {
        debug!(kind = message.kind(), "Dispatching");
        *self.last.lock() = Some(message.clone());

        // Listeners may register or remove listeners; call them unlocked
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(message);
        }
    }

    pub fn last_message(&self) -> Option<ServerMessage> {
        self.last.lock().clone()
    }

    /// Frames dropped because they did not parse.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}
