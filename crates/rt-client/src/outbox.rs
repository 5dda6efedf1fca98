//! Offline outbox: control messages held while the socket is down.
//!
//! Best-effort only. Entries are flushed in FIFO order after the next
//! successful open and are lost if the process exits first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rt_protocol::{ClientMessage, RealtimeError};

/// What to do with a new message when the outbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Refuse the new message and keep what is queued
    #[default]
    RejectNew,
    /// Evict the oldest entry to make room
    DropOldest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub message: ClientMessage,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Outbox {
    entries: VecDeque<OutboxEntry>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl Outbox {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
        }
    }

    /// Queue a message. Under `DropOldest` the evicted entry is returned;
    /// under `RejectNew` a full outbox is a `Capacity` error.
    pub fn push(&mut self, message: ClientMessage) -> Result<Option<OutboxEntry>, RealtimeError> {
        let entry = OutboxEntry {
            message,
            enqueued_at: Utc::now(),
        };

        if self.entries.len() < self.capacity {
            self.entries.push_back(entry);
            return Ok(None);
        }

        match self.policy {
            OverflowPolicy::DropOldest if self.capacity > 0 => {
                let evicted = self.entries.pop_front();
                self.entries.push_back(entry);
                Ok(evicted)
            }
            _ => Err(RealtimeError::Capacity {
                capacity: self.capacity,
            }),
        }
    }

    /// Take every entry, oldest first.
    pub fn drain(&mut self) -> Vec<OutboxEntry> {
        self.entries.drain(..).collect()
    }

    /// Put unsent entries back at the front, keeping their order.
    pub fn restore(&mut self, unsent: impl IntoIterator<Item = OutboxEntry>) {
        let mut unsent: Vec<OutboxEntry> = unsent.into_iter().collect();
        unsent.extend(self.entries.drain(..));
        unsent.truncate(self.capacity);
        self.entries = unsent.into();
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
