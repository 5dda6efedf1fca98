//! Auth gate: in-band `authenticate` handling and per-channel access.
//!
//! Authentication is optional. A failed attempt is reported to the client
//! and the connection stays open as anonymous.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use rt_protocol::{ErrorCode, ServerMessage};
use rt_transport::ConnectionId;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;

/// Minimum HMAC secret length accepted by `JwtValidator`.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token is missing")]
    MissingToken,

    #[error("authentication token is invalid: {0}")]
    InvalidToken(String),

    #[error("authentication token has expired")]
    TokenExpired,

    #[error("authentication is not configured")]
    Unavailable,

    #[error("validator misconfigured: {0}")]
    Misconfigured(String),
}

impl AuthError {
    /// Wire code reported in the `auth_error` frame.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingToken => ErrorCode::MissingToken,
            Self::InvalidToken(_) => ErrorCode::InvalidToken,
            Self::TokenExpired => ErrorCode::TokenExpired,
            Self::Unavailable | Self::Misconfigured(_) => ErrorCode::AuthUnavailable,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token validation
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves a bearer token to a user id.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, token: &str) -> impl std::future::Future<Output = Result<String, AuthError>> + Send;
}

/// Object-safe wrapper for the TokenValidator trait.
trait TokenValidatorDyn: Send + Sync {
    fn validate_dyn<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, AuthError>> + Send + 'a>>;
}

impl<T: TokenValidator> TokenValidatorDyn for T {
    fn validate_dyn<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, AuthError>> + Send + 'a>> {
        Box::pin(self.validate(token))
    }
}

/// Fixed token → user table, for development and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<String, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// HS256 JWT validator. The `sub` claim is the user id; `exp` is required.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &SecretString) -> Result<Self, AuthError> {
        let secret = secret.expose_secret();
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(AuthError::Misconfigured(format!(
                "secret must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = 0;

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            },
        )?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(data.claims.sub)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel policy
// ─────────────────────────────────────────────────────────────────────────────

/// Decides which channels need an authenticated connection.
pub trait ChannelPolicy: Send + Sync + 'static {
    fn requires_auth(&self, channel: &str) -> bool;
}

/// Every channel is open to anonymous connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenChannels;

impl ChannelPolicy for OpenChannels {
    fn requires_auth(&self, _channel: &str) -> bool {
        false
    }
}

/// Listed channels require authentication; the rest are open.
#[derive(Debug, Default, Clone)]
pub struct RestrictedChannels {
    channels: HashSet<String>,
}

impl RestrictedChannels {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }
}

impl ChannelPolicy for RestrictedChannels {
    fn requires_auth(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

pub struct AuthGate {
    validator: Option<Box<dyn TokenValidatorDyn>>,
    policy: Box<dyn ChannelPolicy>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self {
            validator: None,
            policy: Box::new(OpenChannels),
        }
    }
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_validator<V: TokenValidator>(&mut self, validator: V) {
        self.validator = Some(Box::new(validator));
    }

    pub fn set_policy<P: ChannelPolicy>(&mut self, policy: P) {
        self.policy = Box::new(policy);
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Resolve a raw token (an optional `Bearer ` prefix is stripped).
    pub async fn validate(&self, token: &str) -> Result<String, AuthError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let validator = self.validator.as_ref().ok_or(AuthError::Unavailable)?;
        validator.validate_dyn(token).await
    }

    /// Handle an `authenticate` frame and build the reply.
    pub async fn authenticate(
        &self,
        registry: &ConnectionRegistry,
        id: &ConnectionId,
        token: &str,
    ) -> ServerMessage {
        match self.validate(token).await {
            Ok(user_id) => {
                if !registry.set_authenticated(id, &user_id) {
                    debug!(conn_id = %id, "Connection closed during authentication");
                }
                info!(conn_id = %id, %user_id, "Connection authenticated");
                ServerMessage::AuthSuccess { user_id }
            }
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Authentication failed");
                ServerMessage::auth_error(e.code())
            }
        }
    }

    /// Whether the connection may join `channel`.
    pub fn may_subscribe(
        &self,
        registry: &ConnectionRegistry,
        id: &ConnectionId,
        channel: &str,
    ) -> bool {
        !self.policy.requires_auth(channel) || registry.is_authenticated(id)
    }
}
