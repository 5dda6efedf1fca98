//! Deduplicated, ordered views over one kind of domain event.
//!
//! Delivery is at-most-once per connection and a reconnect can replay or
//! reorder events, so consumers merge by event key instead of appending.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rt_protocol::{
    ActivityData, CustomerUpdateData, EventKey, NewQuoteData, QuoteStatusChangeData,
    ServerMessage,
};

use crate::dispatcher::{EventDispatcher, ListenerId};

/// A payload type that can be pulled out of a `ServerMessage`.
pub trait FeedEvent: EventKey + Clone + Send + Sync + 'static {
    fn extract(message: &ServerMessage) -> Option<&Self>;
}

impl FeedEvent for ActivityData {
    fn extract(message: &ServerMessage) -> Option<&Self> {
        match message {
            ServerMessage::ActivityUpdate { data } => Some(data),
            _ => None,
        }
    }
}

impl FeedEvent for QuoteStatusChangeData {
    fn extract(message: &ServerMessage) -> Option<&Self> {
        match message {
            ServerMessage::QuoteStatusChange { data } => Some(data),
            _ => None,
        }
    }
}

impl FeedEvent for NewQuoteData {
    fn extract(message: &ServerMessage) -> Option<&Self> {
        match message {
            ServerMessage::NewQuote { data } => Some(data),
            _ => None,
        }
    }
}

impl FeedEvent for CustomerUpdateData {
    fn extract(message: &ServerMessage) -> Option<&Self> {
        match message {
            ServerMessage::CustomerUpdate { data } => Some(data),
            _ => None,
        }
    }
}

struct FeedInner<T> {
    /// Keys in order of first delivery
    order: VecDeque<String>,
    records: HashMap<String, T>,
    bound: Option<usize>,
}

/// Ordered, key-deduplicated event store. Cheap to clone; clones share
/// the same records.
pub struct EventFeed<T> {
    inner: Arc<Mutex<FeedInner<T>>>,
}

impl<T> Clone for EventFeed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: FeedEvent> Default for EventFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FeedEvent> EventFeed<T> {
    /// An unbounded feed. Every key ever delivered is remembered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                order: VecDeque::new(),
                records: HashMap::new(),
                bound: None,
            })),
        }
    }

    /// Keep at most `bound` records, evicting the oldest. An evicted key is
    /// forgotten: deduplication only holds for records still inside the
    /// bound, and a late redelivery of an evicted event is appended again.
    pub fn bounded(bound: usize) -> Self {
        let feed = Self::new();
        feed.inner.lock().bound = Some(bound);
        feed
    }

    /// Merge one event. A known key is replaced in place; a new key is
    /// appended. Returns `true` for a new key.
    pub fn merge(&self, event: T) -> bool {
        let key = event.event_key();
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.records.get_mut(&key) {
            *slot = event;
            return false;
        }
        inner.order.push_back(key.clone());
        inner.records.insert(key, event);
        if let Some(bound) = inner.bound {
            while inner.order.len() > bound {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.records.remove(&oldest);
                }
            }
        }
        true
    }

    /// Feed every matching event from `dispatcher` into this store.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> ListenerId {
        let feed = self.clone();
        dispatcher.on_message(move |message| {
            if let Some(event) = T::extract(message) {
                feed.merge(event.clone());
            }
        })
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.lock().records.get(key).cloned()
    }

    /// Records in arrival order of their first delivery.
    pub fn snapshot(&self) -> Vec<T> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|key| inner.records.get(key).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.records.clear();
    }
}
