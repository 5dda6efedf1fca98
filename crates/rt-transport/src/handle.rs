//! Per-connection transport handle.
//!
//! A `ConnectionHandle` is the only way to write to a socket. The transport
//! hands it to the `ConnectionHandler` on open and keeps no copy, so whoever
//! stores it owns the connection: dropping the last handle closes the socket.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Utf8Bytes, close_code};
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;

/// Opaque connection identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Close code and reason sent to the peer when the server closes a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

impl CloseRequest {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(close_code::NORMAL, reason)
    }

    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(close_code::AWAY, reason)
    }

    pub(crate) fn into_frame(self) -> CloseFrame {
        CloseFrame {
            code: self.code,
            reason: self.reason.into(),
        }
    }
}

/// Write side of one live socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    frames: mpsc::Sender<Utf8Bytes>,
    close: Arc<watch::Sender<Option<CloseRequest>>>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        frames: mpsc::Sender<Utf8Bytes>,
        close: watch::Sender<Option<CloseRequest>>,
    ) -> Self {
        Self {
            id,
            frames,
            close: Arc::new(close),
        }
    }

    /// Build a handle that is not attached to a socket, plus the receiving
    /// ends, for code that stands in for the transport.
    pub fn detached(
        id: ConnectionId,
        queue_size: usize,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>, watch::Receiver<Option<CloseRequest>>) {
        let (frames_tx, frames_rx) = mpsc::channel(queue_size.max(1));
        let (close_tx, close_rx) = watch::channel(None);
        (Self::new(id, frames_tx, close_tx), frames_rx, close_rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a serialized frame. Never waits: a full queue or a closed
    /// socket is reported as an error for this connection only.
    pub fn send(&self, frame: Utf8Bytes) -> Result<(), TransportError> {
        self.frames.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(self.id.to_string()),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(self.id.to_string()),
        })
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Utf8Bytes::from(text.into()))
    }

    /// Ask the writer to send a close frame and tear the socket down.
    pub fn close(&self, request: CloseRequest) {
        self.close.send_replace(Some(request));
    }

    pub fn is_open(&self) -> bool {
        !self.frames.is_closed() && self.close.borrow().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[tokio::test]
    async fn send_queues_frames_in_order() {
        let (handle, mut rx, _close) = ConnectionHandle::detached(ConnectionId::from("c1"), 4);
        handle.send_text("one").unwrap();
        handle.send_text("two").unwrap();
        assert_eq!(rx.recv().await.unwrap().as_str(), "one");
        assert_eq!(rx.recv().await.unwrap().as_str(), "two");
    }

    #[test]
    fn full_queue_is_reported() {
        let (handle, _rx, _close) = ConnectionHandle::detached(ConnectionId::from("c1"), 1);
        handle.send_text("one").unwrap();
        assert!(matches!(handle.send_text("two"), Err(TransportError::QueueFull(_))));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (handle, rx, _close) = ConnectionHandle::detached(ConnectionId::from("c1"), 1);
        drop(rx);
        assert!(!handle.is_open());
        assert!(matches!(handle.send_text("x"), Err(TransportError::Closed(_))));
    }

    #[test]
    fn close_marks_handle_closed() {
        let (handle, _rx, close_rx) = ConnectionHandle::detached(ConnectionId::from("c1"), 1);
        handle.close(CloseRequest::going_away("heartbeat timeout"));
        assert!(!handle.is_open());
        assert_eq!(close_rx.borrow().as_ref().map(|r| r.code), Some(close_code::AWAY));
    }
}
