//! Hybrid logical/physical timestamp used for causal read ordering.

/// Number of low bits reserved for the logical component.
pub const LOGICAL_BITS: u32 = 12;

/// Largest logical counter value that fits next to the physical component.
pub const MAX_LOGICAL: u16 = (1 << LOGICAL_BITS) - 1;

/// A hybrid timestamp: wall-clock microseconds shifted left by
/// [`LOGICAL_BITS`], with a logical counter in the low bits.
///
/// The packed representation makes `Ord` agree with causal order, so
/// watermarks advance with a plain max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HybridTime(u64);

impl HybridTime {
    /// Sentinel for "no timestamp".
    pub const INVALID: HybridTime = HybridTime(u64::MAX);

    /// Lowest valid timestamp.
    pub const MIN: HybridTime = HybridTime(0);

    /// Builds a timestamp from wall-clock microseconds and a logical
    /// counter.
    ///
    /// Returns `None` when either component does not fit its field width.
    #[must_use]
    pub fn from_micros_and_logical(micros: u64, logical: u16) -> Option<Self> {
        if logical > MAX_LOGICAL || micros >= 1 << (64 - LOGICAL_BITS) {
            return None;
        }
        Some(Self((micros << LOGICAL_BITS) | u64::from(logical)))
    }

    /// Reinterprets a raw packed value as a timestamp.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw packed value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the physical component in microseconds.
    #[must_use]
    pub const fn physical_micros(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// Returns the logical counter component.
    #[must_use]
    pub const fn logical(self) -> u16 {
        (self.0 & ((1 << LOGICAL_BITS) - 1)) as u16
    }

    /// Returns false for the [`HybridTime::INVALID`] sentinel.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::{HybridTime, MAX_LOGICAL};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1_700_000_000_000_000, 0)]
    #[case(1_700_000_000_000_000, MAX_LOGICAL)]
    fn packing_preserves_components(#[case] micros: u64, #[case] logical: u16) {
        let ht = HybridTime::from_micros_and_logical(micros, logical)
            .expect("in-range components must pack");
        assert_that!(ht.physical_micros(), eq(micros));
        assert_that!(ht.logical(), eq(logical));
    }

    #[rstest]
    fn packing_rejects_oversized_components() {
        assert_that!(
            HybridTime::from_micros_and_logical(0, MAX_LOGICAL + 1),
            eq(None)
        );
        assert_that!(HybridTime::from_micros_and_logical(1 << 52, 0), eq(None));
    }

    #[rstest]
    fn order_follows_physical_then_logical() {
        let early = HybridTime::from_micros_and_logical(10, 5).expect("valid");
        let later_logical = HybridTime::from_micros_and_logical(10, 6).expect("valid");
        let later_physical = HybridTime::from_micros_and_logical(11, 0).expect("valid");
        assert_that!(early < later_logical, eq(true));
        assert_that!(later_logical < later_physical, eq(true));
    }

    #[rstest]
    fn invalid_sentinel_is_not_valid() {
        assert_that!(HybridTime::INVALID.is_valid(), eq(false));
        assert_that!(HybridTime::MIN.is_valid(), eq(true));
    }
}
