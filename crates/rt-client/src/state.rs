//! Connection state machine.
//!
//! Pure bookkeeping: every transition updates the state and returns the
//! actions the driver task must perform. No I/O happens here.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start a socket handshake
    Open,
    /// Socket is up: authenticate, replay subscriptions, flush the outbox,
    /// start the heartbeat
    Established,
    /// Arm the reconnect timer, replacing any pending one
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer
    CancelReconnect,
    /// Disarm every timer and abandon any in-flight handshake
    CancelTimers,
    /// Send a normal (1000) close frame and drop the socket
    CloseSocket,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    backoff: Backoff,
    error: Option<String>,
}

impl StateMachine {
    pub fn new(backoff: Backoff, max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            backoff,
            error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Manual `connect()`. A no-op while connecting or connected.
    pub fn begin_connect(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => Vec::new(),
            ConnectionState::Reconnecting => {
                // Skip the remaining backoff
                self.state = ConnectionState::Connecting;
                vec![Action::CancelReconnect, Action::Open]
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.attempts = 0;
                self.state = ConnectionState::Connecting;
                vec![Action::Open]
            }
        }
    }

    /// Handshake completed.
    pub fn opened(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Ignoring open outside of connecting");
            return vec![Action::CloseSocket];
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.error = None;
        vec![Action::Established]
    }

    /// Handshake failed or timed out. The driver follows up with
    /// `closed_unclean` once the error state has been published.
    pub fn handshake_failed(&mut self, reason: impl Into<String>) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Error;
        self.error = Some(reason.into());
        Vec::new()
    }

    /// The socket went away without a normal close, or a pong or send
    /// failed. Schedules a reconnect while attempts remain.
    pub fn closed_unclean(&mut self, reason: impl Into<String>) -> Vec<Action> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Error => {}
            ConnectionState::Disconnected | ConnectionState::Reconnecting => return Vec::new(),
        }
        let reason = reason.into();

        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, %reason, "Reconnect attempts exhausted");
            self.state = ConnectionState::Disconnected;
            self.error = Some(format!(
                "reconnect attempts exhausted after {} tries: {reason}",
                self.attempts
            ));
            return vec![Action::CancelTimers];
        }

        let delay = self.backoff.delay(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        self.error = Some(reason);
        info!(attempt = self.attempts, ?delay, "Scheduling reconnect");
        vec![Action::ScheduleReconnect(delay)]
    }

    /// The server closed with code 1000. No reconnect.
    pub fn closed_clean(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        self.error = None;
        vec![Action::CancelTimers]
    }

    /// The reconnect timer fired.
    pub fn reconnect_due(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::Open]
    }

    /// Explicit `disconnect()`.
    pub fn disconnect_requested(&mut self) -> Vec<Action> {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        self.error = None;
        vec![Action::CancelTimers, Action::CloseSocket]
    }
}
