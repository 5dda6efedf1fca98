//! Quote Realtime Client
//!
//! Keeps one WebSocket to the realtime server alive:
//! - Reconnects with exponential backoff after unclean closes
//! - Replays the desired channel set on every (re)connect
//! - Holds control messages in a bounded outbox while offline
//! - Sends application-level pings and measures latency
//! - Dispatches typed server events to registered listeners
//!
//! All socket I/O happens on one background task owned by
//! `ConnectionManager`; the public handle talks to it over a command channel.

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod heartbeat;
pub mod manager;
pub mod outbox;
pub mod state;
pub mod subscriptions;

pub use backoff::Backoff;
pub use config::ClientConfig;
pub use dispatcher::{EventDispatcher, ListenerId};
pub use error::ClientError;
pub use feed::{EventFeed, FeedEvent};
pub use heartbeat::HeartbeatClient;
pub use manager::{CloseInfo, ConnectionManager, ConnectionStatus, LifecycleHooks};
pub use outbox::{Outbox, OutboxEntry, OverflowPolicy};
pub use state::{Action, ConnectionState, StateMachine};
pub use subscriptions::SubscriptionTracker;
