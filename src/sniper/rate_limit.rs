//! Minimum spacing between trade dispatches, on top of governor.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::time::Duration;
use tracing::{debug, instrument};

/// Allows at most one dispatch per `spacing`, without bursts.
///
/// A zero spacing disables the limiter.
pub struct DispatchSpacing<C: Clock = DefaultClock> {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>>,
    clock: C,
    spacing: Duration,
}

impl DispatchSpacing<DefaultClock> {
    pub fn new(spacing: Duration) -> Self {
        Self::with_clock(spacing, DefaultClock::default())
    }
}

impl<C: Clock + Clone> DispatchSpacing<C> {
    pub fn with_clock(spacing: Duration, clock: C) -> Self {
        // with_period yields a burst of one cell replenished every `spacing`
        let limiter = Quota::with_period(spacing)
            .map(|quota| RateLimiter::direct_with_clock(quota, clock.clone()));
        Self {
            limiter,
            clock,
            spacing,
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Consume the dispatch slot, or report how long until it frees up.
    #[instrument(skip(self))]
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                debug!(wait_ms = wait.as_millis() as u64, "Dispatch spacing not elapsed");
                Err(wait)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    #[test]
    fn test_one_dispatch_per_period() {
        let clock = FakeRelativeClock::default();
        let spacing = DispatchSpacing::with_clock(Duration::from_secs(5), clock.clone());

        assert!(spacing.try_acquire().is_ok());
        let wait = spacing.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_secs(5));

        clock.advance(Duration::from_secs(2));
        assert_eq!(spacing.try_acquire().unwrap_err(), Duration::from_secs(3));

        clock.advance(Duration::from_secs(3));
        assert!(spacing.try_acquire().is_ok());
        assert!(spacing.try_acquire().is_err());
    }

    #[test]
    fn test_no_burst_after_idle() {
        let clock = FakeRelativeClock::default();
        let spacing = DispatchSpacing::with_clock(Duration::from_secs(5), clock.clone());

        clock.advance(Duration::from_secs(60));
        assert!(spacing.try_acquire().is_ok());
        assert!(spacing.try_acquire().is_err());
    }

    #[test]
    fn test_zero_spacing_disables() {
        let spacing = DispatchSpacing::new(Duration::ZERO);
        for _ in 0..10 {
            assert!(spacing.try_acquire().is_ok());
        }
    }
}
