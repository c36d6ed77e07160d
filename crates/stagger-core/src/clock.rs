//! Time source used by the scheduler and the mutator.
//!
//! Everything the scheduler does is expressed relative to a [`Clock`]:
//! stagger offsets, retry backoff, mutation deadlines and the run's stop
//! time. [`SystemClock`] is backed by the wall clock and tokio timers;
//! [`ManualClock`] keeps virtual time so whole runs can be simulated in
//! milliseconds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;

/// Wall time plus a cooperative sleep.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration` of this clock's time.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Real time: `Utc::now()` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Real time spent per virtual sleep so blocking-pool tasks can make progress.
const MANUAL_REAL_YIELD: Duration = Duration::from_millis(1);

/// Virtual clock. `sleep` advances virtual time instantly (after a 1 ms real
/// yield); `advance` moves time forward without sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at a fixed, readable instant (2024-01-01T00:00:00Z).
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now = after(*now, duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let now = self.now.clone();
        Box::pin(async move {
            tokio::time::sleep(MANUAL_REAL_YIELD).await;
            let mut now = now.lock();
            *now = after(*now, duration);
        })
    }
}

/// Convert a std duration to a chrono delta, saturating on overflow.
pub fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at + duration`, saturating at the latest representable instant.
pub fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
