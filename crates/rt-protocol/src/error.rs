//! Error taxonomy and wire error codes.

use serde::{Deserialize, Serialize};

/// Error codes carried by `auth_error` and `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame was not valid JSON or not a known message
    InvalidMessage,
    /// Channel name failed validation
    InvalidChannel,
    /// Channel requires an authenticated connection
    Unauthorized,
    /// `authenticate` carried an empty token
    MissingToken,
    /// Token failed validation
    InvalidToken,
    /// Token was well-formed but expired
    TokenExpired,
    /// No token validator is configured on the server
    AuthUnavailable,
    InternalError,
    /// Any code this build does not know about
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InvalidChannel => "INVALID_CHANNEL",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::MissingToken => "MISSING_TOKEN",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::AuthUnavailable => "AUTH_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidMessage => "message could not be parsed",
            Self::InvalidChannel => "channel name is not valid",
            Self::Unauthorized => "channel requires authentication",
            Self::MissingToken => "authentication token is missing",
            Self::InvalidToken => "authentication token is invalid",
            Self::TokenExpired => "authentication token has expired",
            Self::AuthUnavailable => "authentication is not configured",
            Self::InternalError => "internal server error",
            Self::Unknown => "unknown error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes shared by the server and the client.
///
/// Only `Transport` and `Timeout` tear a connection down. `Protocol` and
/// `Auth` leave it open, and `Capacity` is reported as a `false` return.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed [{code}]: {message}")]
    Auth { code: ErrorCode, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("outbox full (capacity {capacity})")]
    Capacity { capacity: usize },
}

impl RealtimeError {
    pub fn auth(code: ErrorCode) -> Self {
        Self::Auth {
            code,
            message: code.default_message().to_string(),
        }
    }
}
