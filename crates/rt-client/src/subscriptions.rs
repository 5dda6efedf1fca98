//! Desired channel set, independent of the live socket.

use std::collections::BTreeSet;

use rt_protocol::ClientMessage;

/// Ordered so replay after a reconnect is deterministic.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionTracker {
    channels: BTreeSet<String>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the channel was not already desired.
    pub fn add(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    /// Returns `true` if the channel was desired.
    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }

    /// One `subscribe` frame per desired channel.
    pub fn replay(&self) -> Vec<ClientMessage> {
        self.channels.iter().map(ClientMessage::subscribe).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_is_sorted_and_deduplicated() {
        let mut tracker = SubscriptionTracker::new();
        assert!(tracker.add("quotes"));
        assert!(tracker.add("activities"));
        assert!(!tracker.add("quotes"));

        assert_eq!(
            tracker.replay(),
            vec![
                ClientMessage::subscribe("activities"),
                ClientMessage::subscribe("quotes"),
            ]
        );
    }

    #[test]
    fn remove_forgets_the_channel() {
        let mut tracker = SubscriptionTracker::new();
        tracker.add("quotes");
        assert!(tracker.remove("quotes"));
        assert!(!tracker.remove("quotes"));
        assert!(tracker.is_empty());
        assert!(tracker.replay().is_empty());
    }
}
