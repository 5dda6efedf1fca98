//! Quote Realtime Server: connection registry and event fan-out.
//!
//! `RealtimeServer` owns the registry, broadcaster, heartbeat monitor, and
//! auth gate, and implements the transport's `ConnectionHandler`.
//!
//! The registry is process-local. Running several server instances behind a
//! load balancer does not fan messages out between them.

pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod heartbeat;
pub mod registry;
pub mod router;

pub use auth::{
    AuthError, AuthGate, ChannelPolicy, JwtValidator, OpenChannels, RestrictedChannels,
    StaticTokenValidator, TokenValidator,
};
pub use broadcaster::Broadcaster;
pub use config::ServerConfig;
pub use heartbeat::HeartbeatMonitor;
pub use registry::{ConnectionInfo, ConnectionRegistry, RegistryError, RegistryStats};
pub use router::RealtimeServer;
