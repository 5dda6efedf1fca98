//! Fan-out of typed messages to channels or to every connection.

use std::sync::Arc;

use rt_protocol::{
    ActivityData, CustomerUpdateData, NewQuoteData, QuoteStatusChangeData, ServerMessage,
};
use rt_transport::{ConnectionHandle, ConnectionId, TransportError, Utf8Bytes};
use tracing::{debug, error, instrument, warn};

use crate::registry::ConnectionRegistry;

/// Publishes messages through the registry. Cheap to clone; the REST layer
/// holds one to emit domain events.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send to every open member of `channel`. Returns how many connections
    /// accepted the frame.
    #[instrument(skip(self, message), fields(kind = message.kind()))]
    pub fn broadcast_to_channel(&self, channel: &str, message: &ServerMessage) -> usize {
        let targets = self.registry.channel_snapshot(channel);
        if targets.is_empty() {
            debug!("No subscribers");
            return 0;
        }
        self.deliver(targets, message)
    }

    /// Send to every open connection regardless of subscriptions.
    #[instrument(skip(self, message), fields(kind = message.kind()))]
    pub fn broadcast_to_all(&self, message: &ServerMessage) -> usize {
        let targets = self.registry.all_snapshot();
        self.deliver(targets, message)
    }

    /// Send to a single connection (replies such as `pong` and auth results).
    pub fn send_to(&self, id: &ConnectionId, message: &ServerMessage) -> Result<(), TransportError> {
        let handle = self
            .registry
            .handle(id)
            .ok_or_else(|| TransportError::Closed(id.to_string()))?;
        let frame = encode(message).ok_or_else(|| TransportError::Closed(id.to_string()))?;
        let result = handle.send(frame);
        self.registry.record_direct(result.is_ok());
        result
    }

    /// Publish a domain event on its default channel. Control frames are
    /// addressed to one connection and are never published.
    pub fn publish(&self, message: &ServerMessage) -> usize {
        match message.default_channel() {
            Some(channel) => self.broadcast_to_channel(channel, message),
            None => {
                warn!(kind = message.kind(), "Control frame has no channel, not published");
                0
            }
        }
    }

    // ── Typed helpers ───────────────────────────────────────────────────

    #[instrument(skip(self, data), fields(quote_id = %data.quote_id, status = %data.new_status))]
    pub fn broadcast_quote_status_change(&self, data: QuoteStatusChangeData) -> usize {
        self.publish(&ServerMessage::QuoteStatusChange { data })
    }

    #[instrument(skip(self, data), fields(quote_id = %data.quote_id))]
    pub fn broadcast_new_quote(&self, data: NewQuoteData) -> usize {
        self.publish(&ServerMessage::NewQuote { data })
    }

    #[instrument(skip(self, data), fields(customer_id = %data.customer_id))]
    pub fn broadcast_customer_update(&self, data: CustomerUpdateData) -> usize {
        self.publish(&ServerMessage::CustomerUpdate { data })
    }

    #[instrument(skip(self, data), fields(activity_id = %data.id))]
    pub fn broadcast_activity(&self, data: ActivityData) -> usize {
        self.publish(&ServerMessage::ActivityUpdate { data })
    }

    /// Serialize once, then write to each target. A failing target is
    /// logged and skipped; it never affects the others.
    fn deliver(&self, targets: Vec<ConnectionHandle>, message: &ServerMessage) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for handle in targets {
            if !handle.is_open() {
                continue;
            }
            match handle.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!(conn_id = %handle.id(), error = %e, "Send failed");
                }
            }
        }

        self.registry.record_delivery(delivered, failed);
        debug!(delivered, failed, "Broadcast complete");
        delivered
    }
}

fn encode(message: &ServerMessage) -> Option<Utf8Bytes> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Utf8Bytes::from(json)),
        Err(e) => {
            error!(kind = message.kind(), error = %e, "Failed to serialize message");
            None
        }
    }
}
