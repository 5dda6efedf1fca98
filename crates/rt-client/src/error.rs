//! Client error types.

use std::time::Duration;

use rt_protocol::RealtimeError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("pong not received within {0:?}")]
    PongTimeout(Duration),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("not connected")]
    NotConnected,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection task stopped")]
    TaskStopped,

    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}
