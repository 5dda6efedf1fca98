//! Reconnect delay schedule.

use std::time::Duration;

/// Exponential backoff: `min(base * decay^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub decay: f64,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            decay: 1.5,
            cap: Duration::from_millis(30_000),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, decay: f64, cap: Duration) -> Self {
        Self { base, decay, cap }
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.cap.as_secs_f64();
        let raw = self.base.as_secs_f64() * self.decay.powi(attempt.min(i32::MAX as u32) as i32);
        if !raw.is_finite() || raw >= cap {
            return self.cap;
        }
        Duration::from_secs_f64(raw.max(0.0))
    }
}
