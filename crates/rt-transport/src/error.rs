//! Transport and admin-surface errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failures of the socket layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("outbound queue full for {0}")]
    QueueFull(String),

    #[error("connection {0} is closed")]
    Closed(String),

    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the admin HTTP routes.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("admin token missing")]
    MissingToken,

    #[error("admin token invalid")]
    InvalidToken,

    #[error("admin broadcast is disabled (no admin token configured)")]
    Disabled,

    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl AdminError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::Disabled => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "ADMIN_TOKEN_MISSING",
            Self::InvalidToken => "ADMIN_TOKEN_INVALID",
            Self::Disabled => "ADMIN_DISABLED",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (self.status(), body).into_response()
    }
}
