//! Backoff policy for reconnecting after a lost session.
//!
//! The delay grows by a constant factor on every failed attempt, capped
//! at a maximum, and resets once a session actually reaches the world.
//! The translator itself stays agnostic: a new attempt is just a fresh
//! `Connect` with no state carried over.

use std::time::Duration;


/// Exponential backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    factor: f64,
    /// Delay to hand out on the next failure.
    delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

impl ReconnectPolicy {

    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self { initial, max, factor, delay: initial }
    }

    /// The delay to wait before the next attempt; each call grows the
    /// following one until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = self.delay.mul_f64(self.factor).min(self.max);
        delay
    }

    /// Back to the initial delay, called after a successful join.
    pub fn reset(&mut self) {
        self.delay = self.initial;
    }

}
