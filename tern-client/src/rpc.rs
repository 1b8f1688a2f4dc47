//! Tagged batch RPCs and the transport seam.
//!
//! One RPC carries one dispatch group: operations of a single tablet and
//! a single kind. The RPC object holds a strong reference to its batcher,
//! so a batcher never goes away while completions are outstanding; the
//! transport behind [`RpcMessenger`] owns delivery and calls back into
//! [`BatchRpc::write_finished`] / [`BatchRpc::read_finished`] exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tern_common::error::{TernError, TernResult};
use tern_common::hybrid_time::HybridTime;
use tern_common::ids::RequestId;

use crate::batcher::Batcher;
use crate::in_flight_op::InFlightOps;
use crate::meta_cache::RemoteTablet;
use crate::trace::Trace;

/// Read consistency selected by the operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// Read from the tablet leader.
    Strong,
    /// Read a consistent prefix, possibly from a follower.
    ConsistentPrefix,
}

/// One decoded per-row error from a write response.
#[derive(Debug, Clone)]
pub struct PerRowError {
    /// Index of the failed row within the RPC's operation list.
    pub row_index: usize,
    /// Decoded failure status of that row.
    pub error: TernError,
}

impl PerRowError {
    /// Creates a per-row error record.
    #[must_use]
    pub fn new(row_index: usize, error: TernError) -> Self {
        Self { row_index, error }
    }
}

/// Decoded payload of a finished write RPC.
#[derive(Debug, Clone, Default)]
pub struct WriteResponse {
    /// Hybrid time propagated by the tablet server.
    pub propagated_hybrid_time: Option<HybridTime>,
    /// Read time the server actually used, for transaction bookkeeping.
    pub used_read_time: Option<HybridTime>,
    /// Row-level failures; rows not listed succeeded.
    pub per_row_errors: Vec<PerRowError>,
}

/// Decoded payload of a finished read RPC.
#[derive(Debug, Clone, Default)]
pub struct ReadResponse {
    /// Hybrid time propagated by the tablet server.
    pub propagated_hybrid_time: Option<HybridTime>,
    /// Read time the server actually used, for transaction bookkeeping.
    pub used_read_time: Option<HybridTime>,
}

/// Per-RPC extras folded into the flush rendezvous.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushExtraResult {
    /// Hybrid time propagated by the tablet server.
    pub propagated_hybrid_time: Option<HybridTime>,
    /// Read time the server actually used.
    pub used_read_time: Option<HybridTime>,
}

/// RPC path selected by the dispatch group's operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    /// Row mutations to the tablet leader.
    Write,
    /// Reads at the given consistency level.
    Read(ConsistencyLevel),
}

/// Construction inputs shared by every RPC kind.
pub struct RpcData {
    /// Batcher kept alive for the lifetime of the RPC.
    pub batcher: Arc<Batcher>,
    /// Destination tablet.
    pub tablet: Arc<RemoteTablet>,
    /// Whether the transport may execute this call inline on the sending
    /// thread.
    pub allow_local_calls: bool,
    /// Whether the server must apply consistent-read rules.
    pub need_consistent_read: bool,
    /// Whether this RPC must carry transaction metadata.
    pub need_metadata: bool,
    /// Operations of the dispatch group, in sequence order.
    pub ops: InFlightOps,
}

struct WriteRequestIds {
    request_id: RequestId,
    min_running_request_id: RequestId,
    released: AtomicBool,
}

/// One in-flight batch RPC.
pub struct BatchRpc {
    kind: RpcKind,
    batcher: Arc<Batcher>,
    tablet: Arc<RemoteTablet>,
    allow_local_calls: bool,
    need_consistent_read: bool,
    need_metadata: bool,
    ops: InFlightOps,
    trace: Arc<Trace>,
    write_request: Option<WriteRequestIds>,
    finished: AtomicBool,
}

impl BatchRpc {
    /// Creates a write RPC and reserves its retryable request id.
    #[must_use]
    pub fn write(data: RpcData) -> Arc<Self> {
        let (request_id, min_running_request_id) = data
            .batcher
            .client()
            .next_request_id_and_min_running(data.tablet.tablet_id());
        let trace = Arc::new(Trace::new(format!(
            "write rpc to tablet {}",
            data.tablet.tablet_id()
        )));
        Arc::new(Self {
            kind: RpcKind::Write,
            batcher: data.batcher,
            tablet: data.tablet,
            allow_local_calls: data.allow_local_calls,
            need_consistent_read: data.need_consistent_read,
            need_metadata: data.need_metadata,
            ops: data.ops,
            trace,
            write_request: Some(WriteRequestIds {
                request_id,
                min_running_request_id,
                released: AtomicBool::new(false),
            }),
            finished: AtomicBool::new(false),
        })
    }

    /// Creates a read RPC at the given consistency level.
    #[must_use]
    pub fn read(data: RpcData, level: ConsistencyLevel) -> Arc<Self> {
        let trace = Arc::new(Trace::new(format!(
            "{} read rpc to tablet {}",
            match level {
                ConsistencyLevel::Strong => "strong",
                ConsistencyLevel::ConsistentPrefix => "consistent-prefix",
            },
            data.tablet.tablet_id()
        )));
        Arc::new(Self {
            kind: RpcKind::Read(level),
            batcher: data.batcher,
            tablet: data.tablet,
            allow_local_calls: data.allow_local_calls,
            need_consistent_read: data.need_consistent_read,
            need_metadata: data.need_metadata,
            ops: data.ops,
            trace,
            write_request: None,
            finished: AtomicBool::new(false),
        })
    }

    /// Hands this RPC to the client's transport.
    pub fn send(self: &Arc<Self>) {
        let messenger = self.batcher.client().messenger();
        messenger.dispatch(Arc::clone(self));
    }

    /// Completion entry point for write RPCs.
    ///
    /// Feeds per-row errors and the propagated hybrid time into the
    /// batcher, releases the retryable request id, and joins the flush
    /// rendezvous.
    pub fn write_finished(self: &Arc<Self>, status: TernResult<()>, response: WriteResponse) {
        if self.kind != RpcKind::Write {
            log::error!("write completion delivered to {self:?}");
            return;
        }
        if self.finished.swap(true, Ordering::AcqRel) {
            log::error!("duplicate completion for {self:?}");
            return;
        }
        self.batcher
            .process_write_response(self, &status, &response);
        self.release_write_request_id();
        let extra = FlushExtraResult {
            propagated_hybrid_time: response.propagated_hybrid_time,
            used_read_time: response.used_read_time,
        };
        self.batcher.flushed(&self.ops, &status, extra);
    }

    /// Completion entry point for read RPCs.
    pub fn read_finished(self: &Arc<Self>, status: TernResult<()>, response: ReadResponse) {
        if !matches!(self.kind, RpcKind::Read(_)) {
            log::error!("read completion delivered to {self:?}");
            return;
        }
        if self.finished.swap(true, Ordering::AcqRel) {
            log::error!("duplicate completion for {self:?}");
            return;
        }
        self.batcher.process_read_response(self, &status);
        let extra = FlushExtraResult {
            propagated_hybrid_time: response.propagated_hybrid_time,
            used_read_time: response.used_read_time,
        };
        self.batcher.flushed(&self.ops, &status, extra);
    }

    fn release_write_request_id(&self) {
        if let Some(ids) = &self.write_request {
            if !ids.released.swap(true, Ordering::AcqRel) {
                self.batcher
                    .client()
                    .request_finished(self.tablet.tablet_id(), ids.request_id);
            }
        }
    }

    /// Returns the RPC path of this call.
    #[must_use]
    pub fn kind(&self) -> RpcKind {
        self.kind
    }

    /// Returns the read consistency level, for read RPCs.
    #[must_use]
    pub fn consistency_level(&self) -> Option<ConsistencyLevel> {
        match self.kind {
            RpcKind::Read(level) => Some(level),
            RpcKind::Write => None,
        }
    }

    /// Returns the operations carried by this RPC, in sequence order.
    #[must_use]
    pub fn ops(&self) -> &InFlightOps {
        &self.ops
    }

    /// Returns the destination tablet.
    #[must_use]
    pub fn tablet(&self) -> &Arc<RemoteTablet> {
        &self.tablet
    }

    /// Returns whether the transport may run this call inline.
    #[must_use]
    pub fn allow_local_calls(&self) -> bool {
        self.allow_local_calls
    }

    /// Returns whether the server must apply consistent-read rules.
    #[must_use]
    pub fn need_consistent_read(&self) -> bool {
        self.need_consistent_read
    }

    /// Returns whether this RPC carries transaction metadata.
    #[must_use]
    pub fn need_metadata(&self) -> bool {
        self.need_metadata
    }

    /// Returns this RPC's trace node.
    #[must_use]
    pub fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    /// Returns the reserved retryable request id, for write RPCs.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.write_request.as_ref().map(|ids| ids.request_id)
    }

    /// Returns the lowest request id still running against the destination
    /// tablet at reservation time, for write RPCs.
    #[must_use]
    pub fn min_running_request_id(&self) -> Option<RequestId> {
        self.write_request
            .as_ref()
            .map(|ids| ids.min_running_request_id)
    }
}

impl fmt::Debug for BatchRpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRpc")
            .field("kind", &self.kind)
            .field("tablet", self.tablet.tablet_id())
            .field("ops", &self.ops.len())
            .finish()
    }
}

impl Drop for BatchRpc {
    fn drop(&mut self) {
        // An RPC dropped by the transport without a completion must still
        // release its reserved request id.
        self.release_write_request_id();
    }
}

/// Transport seam: delivers batch RPCs to tablet servers.
///
/// Implementations must eventually invoke the matching completion entry
/// point exactly once per dispatched RPC, from any thread. RPCs with
/// `allow_local_calls` set may be completed inline from `dispatch`.
pub trait RpcMessenger: Send + Sync {
    /// Accepts one RPC for delivery.
    fn dispatch(&self, rpc: Arc<BatchRpc>);
}
