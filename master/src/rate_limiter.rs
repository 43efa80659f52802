//! Per-connection rate limit guarding message dispatch

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::num::NonZeroU32;

type DirectLimiter<C> = governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// GCRA limiter allowing `burst` messages at once and `refill_per_second`
/// sustained
///
/// Starts full. Each accepted message consumes one cell; when none are left
/// messages are dropped rather than queued.
pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: DirectLimiter<C>,
}

impl RateLimiter {
    pub fn new(burst: u32, refill_per_second: u32) -> Self {
        Self::with_clock(burst, refill_per_second, &DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Zero values are raised to one; configuration validation rejects them earlier
    pub fn with_clock(burst: u32, refill_per_second: u32, clock: &C) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(refill_per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: governor::RateLimiter::direct_with_clock(quota, clock),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::time::Duration;

    fn drain<C: Clock>(limiter: &RateLimiter<C>) -> usize {
        let mut acquired = 0;
        while limiter.try_acquire() {
            acquired += 1;
        }
        acquired
    }

    #[test]
    fn test_exactly_burst_acquisitions_succeed() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(200, 100, &clock);
        assert_eq!(drain(&limiter), 200);
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill_adds_rate_per_elapsed_second() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(200, 100, &clock);
        drain(&limiter);

        clock.advance(Duration::from_secs(1));
        assert_eq!(drain(&limiter), 100);
    }

    #[test]
    fn test_partial_second_refills_proportionally() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(200, 100, &clock);
        drain(&limiter);

        clock.advance(Duration::from_millis(100));
        assert_eq!(drain(&limiter), 10);
    }

    #[test]
    fn test_idle_time_is_capped_at_burst() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(10, 100, &clock);
        drain(&limiter);

        // A minute of refill would be 6000 cells without the cap
        clock.advance(Duration::from_secs(60));
        assert!(drain(&limiter) < 20);
    }

    #[test]
    fn test_cells_are_spaced_by_refill_interval() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(1, 2, &clock);
        assert!(limiter.try_acquire());

        clock.advance(Duration::from_millis(250));
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(250));
        assert!(limiter.try_acquire());
        clock.advance(Duration::from_millis(250));
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(250));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_wall_clock_limiter_starts_full() {
        let limiter = RateLimiter::new(3, 1);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
