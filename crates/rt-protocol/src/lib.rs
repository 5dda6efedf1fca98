//! Quote Realtime - Protocol Types
//!
//! JSON frame types exchanged over the realtime socket. Every frame is a
//! member of a closed, internally tagged union (`{"type": ...}`), so both the
//! server and the client handle messages exhaustively.
//! This crate is the single source of truth for message shapes, channel
//! names, and error codes.

pub mod channels;
pub mod error;
pub mod messages;
pub mod payloads;

pub use channels::{Channels, MAX_CHANNEL_LEN, validate_channel};
pub use error::{ErrorCode, RealtimeError};
pub use messages::{ClientMessage, ServerMessage, now_millis};
pub use payloads::{
    ActivityData, CustomerUpdateData, EventKey, NewQuoteData, QuoteStatusChangeData,
};
