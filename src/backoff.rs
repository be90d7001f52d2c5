//! Reconnect delay policy for the cluster supervisor.

use std::time::Duration;

/// Growth applied to the delay after each failed session.
const GROWTH_FACTOR: f64 = 1.5;

/// Exponential backoff with a ceiling.
///
/// The supervisor owns exactly one of these across all reconnect
/// attempts. Two transitions: [`Backoff::on_failure`] returns the delay
/// to wait before the next attempt and grows the stored delay;
/// [`Backoff::on_success`] resets it to the initial value.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff bounded by `[initial, max]`, starting at `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed session: returns the delay to wait now, then
    /// grows the stored delay by the growth factor, clamped to the max.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(GROWTH_FACTOR).min(self.max);
        delay
    }

    /// Record a session that connected successfully: reset to the
    /// initial delay.
    pub fn on_success(&mut self) {
        self.current = self.initial;
    }
}
