//! Client heartbeat: periodic `ping`, latency, and pong timeout.
//!
//! Holds deadlines only; the connection task sleeps until `next_ping()` or
//! `pong_deadline()` and calls back in.

use std::time::Duration;

use rt_protocol::{ClientMessage, now_millis};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    timestamp: i64,
    sent_at: Instant,
    deadline: Instant,
}

#[derive(Debug)]
pub struct HeartbeatClient {
    interval: Duration,
    pong_timeout: Duration,
    next_ping: Option<Instant>,
    outstanding: Option<Outstanding>,
    latency: Option<Duration>,
}

impl HeartbeatClient {
    pub fn new(interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            interval,
            pong_timeout,
            next_ping: None,
            outstanding: None,
            latency: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Arm the ping schedule. Disabled when the interval is zero.
    pub fn start(&mut self, now: Instant) {
        self.outstanding = None;
        self.next_ping = self.is_enabled().then(|| now + self.interval);
    }

    /// Disarm both the ping interval and the pong timeout.
    pub fn stop(&mut self) {
        self.next_ping = None;
        self.outstanding = None;
    }

    pub fn next_ping(&self) -> Option<Instant> {
        self.next_ping
    }

    pub fn pong_deadline(&self) -> Option<Instant> {
        self.outstanding.map(|o| o.deadline)
    }

    /// Build the next `ping` if it is due. An already outstanding ping keeps
    /// its original deadline.
    pub fn ping_due(&mut self, now: Instant) -> Option<ClientMessage> {
        let due = self.next_ping.filter(|at| *at <= now)?;
        self.next_ping = Some(due.max(now) + self.interval);

        let timestamp = now_millis();
        let deadline = self
            .outstanding
            .map_or(now + self.pong_timeout, |o| o.deadline);
        self.outstanding = Some(Outstanding {
            timestamp,
            sent_at: now,
            deadline,
        });
        Some(ClientMessage::Ping {
            timestamp: Some(timestamp),
        })
    }

    /// Match a `pong` against the outstanding ping. Returns the round-trip
    /// latency, or `None` for a stale or unsolicited pong.
    pub fn on_pong(&mut self, timestamp: Option<i64>, now: Instant) -> Option<Duration> {
        let outstanding = self.outstanding?;
        if timestamp != Some(outstanding.timestamp) {
            return None;
        }
        self.outstanding = None;
        let latency = now.saturating_duration_since(outstanding.sent_at);
        self.latency = Some(latency);
        Some(latency)
    }

    pub fn pong_timeout(&self) -> Duration {
        self.pong_timeout
    }

    /// Latest measured round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_timestamp(msg: &ClientMessage) -> i64 {
        match msg {
            ClientMessage::Ping { timestamp: Some(ts) } => *ts,
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn pings_on_the_interval() {
        let mut hb = HeartbeatClient::new(Duration::from_secs(30), Duration::from_secs(10));
        let t0 = Instant::now();
        hb.start(t0);
        assert_eq!(hb.next_ping(), Some(t0 + Duration::from_secs(30)));
        assert!(hb.ping_due(t0 + Duration::from_secs(29)).is_none());

        let ping = hb.ping_due(t0 + Duration::from_secs(30)).unwrap();
        ping_timestamp(&ping);
        assert_eq!(hb.next_ping(), Some(t0 + Duration::from_secs(60)));
        assert_eq!(hb.pong_deadline(), Some(t0 + Duration::from_secs(40)));
    }

    #[test]
    fn matching_pong_records_latency_and_clears_timeout() {
        let mut hb = HeartbeatClient::new(Duration::from_secs(30), Duration::from_secs(10));
        let t0 = Instant::now();
        hb.start(t0);
        let sent = t0 + Duration::from_secs(30);
        let ts = ping_timestamp(&hb.ping_due(sent).unwrap());

        // Stale pong is ignored
        assert!(hb.on_pong(Some(ts - 1), sent).is_none());
        assert!(hb.pong_deadline().is_some());

        let latency = hb.on_pong(Some(ts), sent + Duration::from_millis(25)).unwrap();
        assert_eq!(latency, Duration::from_millis(25));
        assert_eq!(hb.latency(), Some(latency));
        assert!(hb.pong_deadline().is_none());
    }

    #[test]
    fn unanswered_ping_keeps_its_first_deadline() {
        let mut hb = HeartbeatClient::new(Duration::from_secs(5), Duration::from_secs(10));
        let t0 = Instant::now();
        hb.start(t0);
        hb.ping_due(t0 + Duration::from_secs(5)).unwrap();
        hb.ping_due(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(hb.pong_deadline(), Some(t0 + Duration::from_secs(15)));
    }

    #[test]
    fn zero_interval_disables_pings() {
        let mut hb = HeartbeatClient::new(Duration::ZERO, Duration::from_secs(10));
        let t0 = Instant::now();
        hb.start(t0);
        assert!(hb.next_ping().is_none());
        assert!(hb.ping_due(t0 + Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn stop_clears_every_deadline() {
        let mut hb = HeartbeatClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let t0 = Instant::now();
        hb.start(t0);
        hb.ping_due(t0 + Duration::from_secs(1));
        hb.stop();
        assert!(hb.next_ping().is_none());
        assert!(hb.pong_deadline().is_none());
    }
}
