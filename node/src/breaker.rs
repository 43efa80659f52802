use shared::utils::current_millis;
use std::sync::atomic::{AtomicU64, Ordering};

/// Timed gate suppressing outbound telemetry after a master directive
///
/// There is no explicit reset; the gate reopens once its deadline passes.
#[derive(Debug, Default)]
pub struct CircuitBreakerGate {
    active_until: AtomicU64,
}

impl CircuitBreakerGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self, duration_ms: u64) {
        self.trip_at(current_millis(), duration_ms);
    }

    pub fn trip_at(&self, now: u64, duration_ms: u64) {
        self.active_until
            .store(now.saturating_add(duration_ms), Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(current_millis())
    }

    pub fn is_active_at(&self, now: u64) -> bool {
        now < self.active_until.load(Ordering::Acquire)
    }

    /// Milliseconds until the gate reopens, 0 when already open
    pub fn remaining_ms(&self) -> u64 {
        self.active_until
            .load(Ordering::Acquire)
            .saturating_sub(current_millis())
    }
}
