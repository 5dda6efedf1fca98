//! Quote Realtime Transport Layer
//!
//! Provides the WebSocket endpoint and the administrative HTTP surface.
//! The transport layer handles:
//! - HTTP upgrade and per-connection read/write loops
//! - A bounded outbound queue per connection (`ConnectionHandle`)
//! - `GET /health` and the admin-gated `POST /broadcast`
//! - Connection limits and CORS
//!
//! It knows nothing about channels or authentication; those live behind the
//! `ConnectionHandler` trait.

pub mod error;
pub mod handle;
pub mod server;

pub use error::{AdminError, TransportError};
pub use axum::extract::ws::{Utf8Bytes, close_code};
pub use handle::{CloseRequest, ConnectionHandle, ConnectionId};
pub use server::{BroadcastRequest, BroadcastResponse, ConnectionHandler, TransportConfig, TransportServer};
