//! Distributed-transaction handshake consumed by the batch runtime.

use std::sync::Arc;
use std::time::Instant;

use tern_common::error::TernResult;
use tern_common::hybrid_time::HybridTime;

use crate::in_flight_op::{InFlightOps, InFlightOpsGroups};
use crate::trace::Trace;

/// Completion callback of a deferred transaction prepare.
pub type TransactionReadyCallback = Box<dyn FnOnce(TernResult<()>) + Send>;

/// The transaction surface the batch runtime depends on.
///
/// Dispatch of a transactional batch is gated on `prepare`: the
/// transaction fills in which dispatch groups must carry transaction
/// metadata and only then may RPCs go out.
pub trait BatchTransaction: Send + Sync {
    /// Announces how many operations the next flush will carry.
    ///
    /// Retries of previously failed operations within the same transaction
    /// are already expected and must not be announced again.
    fn expect_operations(&self, count: usize);

    /// Prepares transaction metadata for the given dispatch groups,
    /// marking through
    /// [`crate::in_flight_op::InFlightOpsGroup::set_need_metadata`] which
    /// groups must carry it.
    ///
    /// Returns true when metadata is ready now; the callback is then never
    /// invoked. Returns false when readiness is pending, in which case the
    /// callback fires later with the outcome, possibly from another
    /// thread.
    fn prepare(
        &self,
        ops_info: &InFlightOpsGroups,
        force_consistent_read: bool,
        deadline: Option<Instant>,
        initial: bool,
        ready: TransactionReadyCallback,
    ) -> bool;

    /// Tells the transaction that these operations left the running set.
    ///
    /// Called once per RPC completion unless the error will be retried at
    /// the session level within the same transaction.
    fn flushed(
        &self,
        ops: &InFlightOps,
        used_read_time: Option<HybridTime>,
        status: &TernResult<()>,
    );

    /// Returns the transaction's trace node for linking RPC child traces.
    fn trace(&self) -> Option<Arc<Trace>> {
        None
    }
}
