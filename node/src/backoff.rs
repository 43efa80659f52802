use shared::RECONNECT_BACKOFF_MULTIPLIER;
use std::time::Duration;

/// Exponential reconnect delay
///
/// The first failure waits `initial`; each following failure doubles the
/// wait up to `max`. A successful connection calls [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * RECONNECT_BACKOFF_MULTIPLIER).min(self.max);
        delay
    }

    /// Delay the next failure will wait
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
