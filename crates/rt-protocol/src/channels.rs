//! Channel name constants and validation.
//!
//! Channels are plain topic strings. The three below are the ones the
//! dashboard's feature hooks subscribe to; any other valid name works too.

use crate::error::RealtimeError;

/// Well-known channel names.
pub struct Channels;

impl Channels {
    /// Activity feed entries (`activity_update`).
    pub const ACTIVITIES: &str = "activities";
    /// Quote lifecycle events (`new_quote`, `quote_status_change`).
    pub const QUOTES: &str = "quotes";
    /// Customer record changes (`customer_update`).
    pub const CUSTOMERS: &str = "customers";

    pub fn all() -> [&'static str; 3] {
        [Self::ACTIVITIES, Self::QUOTES, Self::CUSTOMERS]
    }
}

/// Maximum channel name length in bytes.
pub const MAX_CHANNEL_LEN: usize = 128;

/// Check that a channel name is non-empty, bounded, and uses the allowed
/// character set (ASCII alphanumerics plus `-`, `_`, `.`, `:`).
pub fn validate_channel(channel: &str) -> Result<(), RealtimeError> {
    if channel.is_empty() {
        return Err(RealtimeError::Protocol("channel name is empty".into()));
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(RealtimeError::Protocol(format!(
            "channel name exceeds {MAX_CHANNEL_LEN} bytes"
        )));
    }
    let valid = channel
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !valid {
        return Err(RealtimeError::Protocol(format!(
            "channel name contains invalid characters: {channel}"
        )));
    }
    Ok(())
}
