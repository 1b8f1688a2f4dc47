//! Hybrid clock abstraction and the default system-clock implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tern_common::hybrid_time::HybridTime;

/// Source of hybrid timestamps that can also learn remote time.
///
/// Observing a propagated timestamp guarantees that every later `now()`
/// reads at least as high, which is what read-your-writes bookkeeping
/// relies on.
pub trait HybridClock: std::fmt::Debug + Send + Sync {
    /// Returns a timestamp strictly greater than any previously returned
    /// or observed one.
    fn now(&self) -> HybridTime;

    /// Folds a remotely propagated timestamp into this clock.
    ///
    /// Invalid timestamps are ignored.
    fn observe(&self, ht: HybridTime);
}

/// Hybrid clock backed by the wall clock and an atomic high-water mark.
///
/// When wall time stalls or runs behind an observed remote time, the
/// logical component keeps results strictly increasing.
#[derive(Debug, Default)]
pub struct SystemHybridClock {
    last: AtomicU64,
}

impl SystemHybridClock {
    /// Creates a clock starting at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_micros() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_micros() as u64)
    }
}

impl HybridClock for SystemHybridClock {
    fn now(&self) -> HybridTime {
        let wall =
            HybridTime::from_micros_and_logical(Self::wall_micros(), 0).unwrap_or(HybridTime::MIN);
        let mut result = wall;
        let _ = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                result = wall.max(HybridTime::from_raw(last.saturating_add(1)));
                Some(result.raw())
            });
        result
    }

    fn observe(&self, ht: HybridTime) {
        if ht.is_valid() {
            let _ = self.last.fetch_max(ht.raw(), Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HybridClock, SystemHybridClock};
    use googletest::prelude::*;
    use rstest::rstest;
    use tern_common::hybrid_time::HybridTime;

    #[rstest]
    fn now_is_strictly_increasing() {
        let clock = SystemHybridClock::new();
        let first = clock.now();
        let second = clock.now();
        let third = clock.now();
        assert_that!(first < second, eq(true));
        assert_that!(second < third, eq(true));
    }

    #[rstest]
    fn observed_remote_time_moves_the_clock_forward() {
        let clock = SystemHybridClock::new();
        let far_future = HybridTime::from_micros_and_logical(1 << 51, 0).expect("valid");
        clock.observe(far_future);
        assert_that!(clock.now() > far_future, eq(true));
    }

    #[rstest]
    fn invalid_observations_are_ignored() {
        let clock = SystemHybridClock::new();
        let before = clock.now();
        clock.observe(HybridTime::INVALID);
        let after = clock.now();
        assert_that!(after.is_valid(), eq(true));
        assert_that!(before < after, eq(true));
    }
}
