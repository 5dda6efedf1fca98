//! Client and server frame unions.

use serde::{Deserialize, Serialize};

use crate::channels::Channels;
use crate::error::ErrorCode;
use crate::payloads::{ActivityData, CustomerUpdateData, NewQuoteData, QuoteStatusChangeData};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────────────────

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat; the server echoes `timestamp` in its `pong`
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Upgrade the connection with a bearer token
    Authenticate { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

impl ClientMessage {
    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp: Some(now_millis()),
        }
    }

    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::Unsubscribe {
            channel: channel.into(),
        }
    }

    pub fn authenticate(token: impl Into<String>) -> Self {
        Self::Authenticate {
            token: token.into(),
        }
    }

    /// Wire tag of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::Authenticate { .. } => "authenticate",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────────────────

/// Frames the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ActivityUpdate {
        data: ActivityData,
    },
    QuoteStatusChange {
        data: QuoteStatusChangeData,
    },
    NewQuote {
        data: NewQuoteData,
    },
    CustomerUpdate {
        data: CustomerUpdateData,
    },
    /// Reply to `ping`
    Pong {
        /// Echo of the client's ping timestamp
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Authentication failed; the connection stays open as anonymous
    AuthError {
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn pong(timestamp: Option<i64>) -> Self {
        Self::Pong {
            timestamp,
            server_time: now_millis(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn auth_error(code: ErrorCode) -> Self {
        Self::AuthError {
            code,
            message: Some(code.default_message().to_string()),
        }
    }

    /// Wire tag of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActivityUpdate { .. } => "activity_update",
            Self::QuoteStatusChange { .. } => "quote_status_change",
            Self::NewQuote { .. } => "new_quote",
            Self::CustomerUpdate { .. } => "customer_update",
            Self::Pong { .. } => "pong",
            Self::AuthSuccess { .. } => "auth_success",
            Self::AuthError { .. } => "auth_error",
            Self::Error { .. } => "error",
        }
    }

    /// Default channel a domain event is published on. Control frames
    /// (`pong`, auth results, errors) are addressed to one connection and
    /// have no channel.
    pub fn default_channel(&self) -> Option<&'static str> {
        match self {
            Self::ActivityUpdate { .. } => Some(Channels::ACTIVITIES),
            Self::QuoteStatusChange { .. } | Self::NewQuote { .. } => Some(Channels::QUOTES),
            Self::CustomerUpdate { .. } => Some(Channels::CUSTOMERS),
            Self::Pong { .. }
            | Self::AuthSuccess { .. }
            | Self::AuthError { .. }
            | Self::Error { .. } => None,
        }
    }
}
