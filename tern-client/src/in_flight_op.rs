//! Per-flush operation records and their dispatch groups.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tern_common::error::TernError;
use tern_common::ids::{PartitionKey, SequenceNumber};

use crate::meta_cache::RemoteTablet;
use crate::op::{OpGroup, Operation};

/// Mutable flush-time state of one submitted operation.
///
/// The record owns everything a flush learns about the operation: the
/// encoded partition key, the resolved tablet, and any error collected on
/// the way. Lock order: the batcher lock, when held, is always taken
/// before a record's error lock.
#[derive(Debug)]
pub struct InFlightOp {
    op: Arc<Operation>,
    partition_key: PartitionKey,
    sequence_number: SequenceNumber,
    tablet: OnceLock<Arc<RemoteTablet>>,
    error: Mutex<Option<TernError>>,
}

impl InFlightOp {
    /// Creates a record for one submitted operation.
    ///
    /// The sequence number is the operation's zero-based submission index
    /// and stays stable for the lifetime of the flush; it is what keeps
    /// same-partition-key operations ordered all the way to the wire.
    #[must_use]
    pub fn new(
        op: Arc<Operation>,
        partition_key: PartitionKey,
        sequence_number: SequenceNumber,
    ) -> Self {
        Self {
            op,
            partition_key,
            sequence_number,
            tablet: OnceLock::new(),
            error: Mutex::new(None),
        }
    }

    /// Returns the submitted operation.
    #[must_use]
    pub fn op(&self) -> &Arc<Operation> {
        &self.op
    }

    /// Returns the encoded partition key.
    #[must_use]
    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// Returns the zero-based submission index.
    #[must_use]
    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    /// Returns the resolved tablet, once a lookup succeeded.
    #[must_use]
    pub fn tablet(&self) -> Option<&Arc<RemoteTablet>> {
        self.tablet.get()
    }

    /// Records the resolved tablet. A second resolution is logged and
    /// ignored; the first handle stays authoritative.
    pub fn set_tablet(&self, tablet: Arc<RemoteTablet>) {
        if self.tablet.set(tablet).is_err() {
            log::warn!(
                "ignoring duplicate tablet resolution for operation #{}",
                self.sequence_number
            );
        }
    }

    /// Returns a copy of the currently recorded error, if any.
    #[must_use]
    pub fn error(&self) -> Option<TernError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true when an error has been recorded.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Records an error, replacing any earlier one.
    pub fn set_error(&self, error: TernError) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

/// Operations of one flush attempt, shared with the RPCs that carry them.
pub type InFlightOps = Vec<Arc<InFlightOp>>;

/// Maximal run of sorted in-flight operations that share one tablet and
/// one [`OpGroup`] kind, dispatched as a single RPC.
///
/// The metadata flag is atomic: the transaction sets it through a shared
/// reference during prepare, and dispatch reads it afterwards, possibly
/// from another thread.
#[derive(Debug)]
pub struct InFlightOpsGroup {
    ops: InFlightOps,
    need_metadata: AtomicBool,
}

impl InFlightOpsGroup {
    /// Creates a group over a non-empty slice of sorted operations.
    #[must_use]
    pub fn new(ops: InFlightOps) -> Self {
        Self {
            ops,
            need_metadata: AtomicBool::new(false),
        }
    }

    /// Returns the operations of this group in sequence order.
    #[must_use]
    pub fn ops(&self) -> &InFlightOps {
        &self.ops
    }

    /// Returns the grouping kind shared by all operations of this group.
    #[must_use]
    pub fn group(&self) -> Option<OpGroup> {
        self.ops.first().map(|op| op.op().group())
    }

    /// Returns the tablet shared by all operations of this group.
    #[must_use]
    pub fn tablet(&self) -> Option<&Arc<RemoteTablet>> {
        self.ops.first().and_then(|op| op.tablet())
    }

    /// Returns true when the RPC for this group must carry transaction
    /// metadata.
    #[must_use]
    pub fn need_metadata(&self) -> bool {
        self.need_metadata.load(Ordering::Acquire)
    }

    /// Marks whether the RPC for this group must carry transaction
    /// metadata. Set by the transaction during prepare.
    pub fn set_need_metadata(&self, need_metadata: bool) {
        self.need_metadata.store(need_metadata, Ordering::Release);
    }
}

/// Ordered partition of the in-flight vector into dispatch groups.
///
/// The plan is shared between the batcher and the transaction for the
/// duration of the prepare handshake and is never replaced mid-flush.
#[derive(Debug, Default)]
pub struct InFlightOpsGroups {
    groups: Vec<InFlightOpsGroup>,
}

impl InFlightOpsGroups {
    /// Creates the grouping plan.
    #[must_use]
    pub fn new(groups: Vec<InFlightOpsGroup>) -> Self {
        Self { groups }
    }

    /// Returns the groups in dispatch order.
    #[must_use]
    pub fn groups(&self) -> &[InFlightOpsGroup] {
        &self.groups
    }
}
