//! Injected tunables shared by client runtime components.

/// Test-only knobs altering batch error aggregation and lookup validation.
///
/// Production clients leave this at `Default`. The knobs are injected per
/// batch instead of living in process-wide globals, so tests that enable
/// them stay hermetic.
#[derive(Debug, Clone, PartialEq)]
pub struct BatcherTestConfig {
    /// Combine per-operation errors into the aggregated flush status.
    ///
    /// When disabled, the aggregated status of a partially failed flush is
    /// a generic tablet-errors status and per-op detail stays in the error
    /// collector.
    pub combine_errors: bool,
    /// Probability of replacing a successful tablet lookup with a
    /// key-not-in-partition internal error.
    pub simulate_partition_mismatch_probability: f64,
}

impl Default for BatcherTestConfig {
    fn default() -> Self {
        Self {
            combine_errors: false,
            simulate_partition_mismatch_probability: 0.0,
        }
    }
}
