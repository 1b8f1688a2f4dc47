//! Consistent read point: the session's read-your-writes watermark.

use std::sync::{Arc, Mutex, PoisonError};

use tern_common::hybrid_time::HybridTime;

use crate::clock::HybridClock;

/// Client-side high-water mark ensuring reads observe earlier writes of
/// the same session across batches.
///
/// Hybrid times propagated back by tablet servers are folded into both the
/// local clock and the watermark.
#[derive(Debug)]
pub struct ConsistentReadPoint {
    clock: Arc<dyn HybridClock>,
    read_time: Mutex<HybridTime>,
}

impl ConsistentReadPoint {
    /// Creates a read point starting at the clock's current time.
    #[must_use]
    pub fn new(clock: Arc<dyn HybridClock>) -> Self {
        let now = clock.now();
        Self {
            clock,
            read_time: Mutex::new(now),
        }
    }

    /// Folds a propagated hybrid time into the clock and advances the
    /// watermark. Invalid timestamps are ignored.
    pub fn update_clock(&self, propagated: HybridTime) {
        if !propagated.is_valid() {
            return;
        }
        self.clock.observe(propagated);
        let mut read_time = self
            .read_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if propagated > *read_time {
            *read_time = propagated;
        }
    }

    /// Returns the current watermark.
    #[must_use]
    pub fn read_time(&self) -> HybridTime {
        *self
            .read_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
