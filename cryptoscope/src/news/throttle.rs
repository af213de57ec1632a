use std::sync::{Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Spacing enforced between outbound calls by default.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(5000);

/// Minimum-interval limiter shared by every caller of one upstream.
///
/// Only one send is in flight at a time: [`RateLimiter::acquire`] hands out a
/// [`SendSlot`] that is held for the whole request. Once granted, the slot waits
/// until `interval` has passed since the previous send started and since the
/// previous successful send completed. Completion is recorded with
/// [`SendSlot::success`]; dropping the slot without it releases the next caller
/// with only the start-to-start spacing applied.
///
/// Time comes from `tokio::time`, so tests can drive it with a paused runtime.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    in_flight: AsyncMutex<()>,
    next_allowed: Mutex<Option<Instant>>,
}

/// Exclusive right to send one request; releases the limiter when dropped.
#[derive(Debug)]
pub struct SendSlot<'a> {
    limiter: &'a RateLimiter,
    _guard: AsyncMutexGuard<'a, ()>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            in_flight: AsyncMutex::new(()),
            next_allowed: Mutex::new(None),
        }
    }

    /// Wait until no other send is in flight and the interval has elapsed.
    pub async fn acquire(&self) -> SendSlot<'_> {
        let guard = self.in_flight.lock().await;

        let now = Instant::now();
        let slot = self.reserve(now);
        if slot > now {
            debug!(wait_ms = (slot - now).as_millis() as u64, "throttle: delaying request");
            tokio::time::sleep_until(slot).await;
        }

        SendSlot {
            limiter: self,
            _guard: guard,
        }
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut next = self.next_allowed.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match *next {
            Some(t) if t > now => t,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot
    }

    fn record_completion(&self) {
        let earliest = Instant::now() + self.interval;
        let mut next = self.next_allowed.lock().unwrap_or_else(PoisonError::into_inner);
        if next.map_or(true, |t| t < earliest) {
            *next = Some(earliest);
        }
    }
}

impl SendSlot<'_> {
    /// Mark the send as successful; the next send waits `interval` from now.
    pub fn success(self) {
        self.limiter.record_completion();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
