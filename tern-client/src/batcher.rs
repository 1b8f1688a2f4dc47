//! The request batcher: resolves, groups, dispatches, and merges one
//! flush worth of per-row operations.
//!
//! Control flow is event driven. Each stage is advanced by an external
//! completion (lookup done, transaction ready, RPC done) that decrements a
//! counter; only the completion that drives a counter to zero advances the
//! state machine. All mutable state sits behind one internal mutex.
//!
//! Lock order: session lock before batcher lock before in-flight-op lock.
//! Every path that completes a stage releases the batcher lock before
//! chaining into session hooks, transaction callbacks, or the user
//! callback; these locks are non-reentrant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use hashbrown::HashMap;
use rand::Rng;

use tern_common::config::BatcherTestConfig;
use tern_common::error::{ClientErrorCode, TernError, TernResult};
use tern_common::ids::PartitionKey;

use crate::client::ClientContext;
use crate::error_collector::{CollectedErrors, ErrorCollector};
use crate::in_flight_op::{InFlightOp, InFlightOps, InFlightOpsGroup, InFlightOpsGroups};
use crate::meta_cache::RemoteTablet;
use crate::op::{OpGroup, Operation};
use crate::read_point::ConsistentReadPoint;
use crate::rpc::{
    BatchRpc, ConsistencyLevel, FlushExtraResult, RpcData, WriteResponse,
};
use crate::session::{should_session_retry, RejectionScoreSource, SessionHooks};
use crate::transaction::BatchTransaction;

/// User callback receiving the aggregated flush status.
pub type FlushCallback = Box<dyn FnOnce(TernResult<()>) + Send>;

/// Lifecycle states of one batcher.
///
/// States only advance in declaration order, except that `Aborted` may be
/// entered from any non-terminal state. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Accepting operations; flush has not started.
    GatheringOps,
    /// Tablet lookups are in flight.
    ResolvingTablets,
    /// Waiting for the transaction to prepare metadata.
    TransactionPrepare,
    /// RPCs may be dispatched and completed.
    TransactionReady,
    /// Flush finished; the callback has been scheduled.
    Complete,
    /// Flush failed as a whole; the callback has been scheduled.
    Aborted,
}

impl BatcherState {
    /// Returns true for the sticky end states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

struct BatcherInner {
    state: BatcherState,
    ops: Vec<Arc<Operation>>,
    ops_queue: InFlightOps,
    ops_info: Arc<InFlightOpsGroups>,
    combined_error: Option<TernError>,
    flush_callback: Option<FlushCallback>,
    deadline: Option<Instant>,
}

enum LookupsOutcome {
    Finish,
    Abort(TernError),
    Execute,
}

/// Coordinates one flush attempt of a session's buffered operations.
///
/// A batcher is created by its session, filled through [`Batcher::add`],
/// and consumed by one [`Batcher::flush_async`]. It never retries; the
/// session decides whether to build a fresh batcher for failed
/// operations. Asynchronous continuations hold the batcher strongly, the
/// session is held weakly.
pub struct Batcher {
    client: Arc<dyn ClientContext>,
    weak_session: Weak<dyn SessionHooks>,
    transaction: Option<Arc<dyn BatchTransaction>>,
    read_point: Option<Arc<ConsistentReadPoint>>,
    force_consistent_read: bool,
    allow_local_calls_in_curr_thread: bool,
    rejection_score_source: Option<Arc<dyn RejectionScoreSource>>,
    test_config: BatcherTestConfig,
    error_collector: ErrorCollector,
    outstanding_lookups: AtomicUsize,
    outstanding_rpcs: AtomicUsize,
    inner: Mutex<BatcherInner>,
}

impl Batcher {
    /// Creates a batcher for one flush attempt.
    #[must_use]
    pub fn new(
        client: Arc<dyn ClientContext>,
        session: &Arc<dyn SessionHooks>,
        transaction: Option<Arc<dyn BatchTransaction>>,
        read_point: Option<Arc<ConsistentReadPoint>>,
        force_consistent_read: bool,
    ) -> Self {
        Self {
            client,
            weak_session: Arc::downgrade(session),
            transaction,
            read_point,
            force_consistent_read,
            allow_local_calls_in_curr_thread: true,
            rejection_score_source: None,
            test_config: BatcherTestConfig::default(),
            error_collector: ErrorCollector::new(),
            outstanding_lookups: AtomicUsize::new(0),
            outstanding_rpcs: AtomicUsize::new(0),
            inner: Mutex::new(BatcherInner {
                state: BatcherState::GatheringOps,
                ops: Vec::new(),
                ops_queue: Vec::new(),
                ops_info: Arc::new(InFlightOpsGroups::default()),
                combined_error: None,
                flush_callback: None,
                deadline: None,
            }),
        }
    }

    /// Forbids or allows inline transport execution for the last dispatch
    /// group.
    pub fn set_allow_local_calls_in_current_thread(&mut self, allow: bool) {
        self.allow_local_calls_in_curr_thread = allow;
    }

    /// Attaches the source consulted by [`Batcher::rejection_score`].
    pub fn set_rejection_score_source(&mut self, source: Arc<dyn RejectionScoreSource>) {
        self.rejection_score_source = Some(source);
    }

    /// Overrides the test-only tunables.
    pub fn set_test_config(&mut self, config: BatcherTestConfig) {
        self.test_config = config;
    }

    /// Returns the client context this batcher runs in.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn ClientContext> {
        &self.client
    }

    /// Returns the attached transaction, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&Arc<dyn BatchTransaction>> {
        self.transaction.as_ref()
    }

    /// Appends an operation. Ignored with an error log unless the batcher
    /// is still gathering.
    pub fn add(&self, op: Arc<Operation>) {
        let mut inner = self.lock_inner();
        if inner.state != BatcherState::GatheringOps {
            log::error!(
                "{}add called in state {:?}",
                self.log_prefix(),
                inner.state
            );
            return;
        }
        inner.ops.push(op);
    }

    /// Returns true when exactly this operation object was added.
    #[must_use]
    pub fn has(&self, op: &Arc<Operation>) -> bool {
        self.lock_inner()
            .ops
            .iter()
            .any(|candidate| Arc::ptr_eq(candidate, op))
    }

    /// Returns true when any operations were added.
    #[must_use]
    pub fn has_pending_operations(&self) -> bool {
        !self.lock_inner().ops.is_empty()
    }

    /// Returns the number of buffered operations, or zero once a flush
    /// started and the operations stopped being "buffered".
    #[must_use]
    pub fn count_buffered_operations(&self) -> usize {
        let inner = self.lock_inner();
        if inner.state == BatcherState::GatheringOps {
            inner.ops.len()
        } else {
            0
        }
    }

    /// Records the advisory deadline propagated to lookups and RPCs.
    ///
    /// No timer fires inside the batcher itself; collaborators report an
    /// elapsed deadline through their normal error paths.
    pub fn set_deadline(&self, deadline: Instant) {
        self.lock_inner().deadline = Some(deadline);
    }

    /// Delegates to the attached rejection score source; zero without one.
    #[must_use]
    pub fn rejection_score(&self, attempt: i32) -> f64 {
        self.rejection_score_source
            .as_ref()
            .map_or(0.0, |source| source.score(attempt))
    }

    /// Drains the per-operation errors collected by this flush.
    #[must_use]
    pub fn get_and_clear_pending_errors(&self) -> CollectedErrors {
        self.error_collector.get_and_clear_errors()
    }

    /// Starts the flush: resolves every operation's tablet, then groups,
    /// gates on the transaction, dispatches, and finally invokes
    /// `callback` exactly once with the aggregated status.
    ///
    /// Retries driven by the transaction itself set
    /// `is_within_transaction_retry`, because the transaction already
    /// expects those operations.
    pub fn flush_async(
        self: &Arc<Self>,
        callback: FlushCallback,
        is_within_transaction_retry: bool,
    ) {
        let (ops, deadline) = {
            let mut inner = self.lock_inner();
            if inner.state != BatcherState::GatheringOps {
                let state = inner.state;
                drop(inner);
                log::error!("{}flush requested in state {state:?}", self.log_prefix());
                callback(Err(TernError::IllegalState(format!(
                    "flush requested in state {state:?}"
                ))));
                return;
            }
            inner.state = BatcherState::ResolvingTablets;
            inner.flush_callback = Some(callback);
            (inner.ops.clone(), inner.deadline)
        };

        let operations_count = ops.len();
        self.outstanding_lookups
            .store(operations_count, Ordering::Release);

        if let Some(session) = self.weak_session.upgrade() {
            session.flush_started(self);
        }

        if let Some(transaction) = &self.transaction {
            if !is_within_transaction_retry {
                transaction.expect_operations(operations_count);
            }
        }

        if operations_count == 0 {
            self.flush_finished();
            return;
        }

        let mut queue: InFlightOps = Vec::with_capacity(operations_count);
        for (sequence_number, op) in ops.iter().enumerate() {
            let error = match op.partition_key() {
                Ok(partition_key) => {
                    if partition_key.is_empty()
                        && op.table().partition_schema().is_hash()
                        && !op.read_only()
                    {
                        Some(TernError::IllegalState(format!(
                            "hash partition key is empty for write operation #{sequence_number}"
                        )))
                    } else {
                        queue.push(Arc::new(InFlightOp::new(
                            Arc::clone(op),
                            partition_key,
                            sequence_number,
                        )));
                        None
                    }
                }
                Err(error) => Some(error),
            };
            if let Some(error) = error {
                self.lock_inner().combined_error = Some(error);
                self.flush_finished();
                return;
            }
        }

        {
            let mut inner = self.lock_inner();
            inner.ops_queue = queue.clone();
        }

        let meta_cache = self.client.meta_cache();
        for in_flight in queue {
            log::trace!(
                "{}looking up tablet for operation #{}, partition key {:02x?}",
                self.log_prefix(),
                in_flight.sequence_number(),
                in_flight.partition_key()
            );
            if let Some(hint) = in_flight.op().tablet_hint() {
                let hint = Arc::clone(hint);
                self.tablet_lookup_finished(&in_flight, Ok(hint));
            } else {
                let this = Arc::clone(self);
                let record = Arc::clone(&in_flight);
                let table = Arc::clone(in_flight.op().table());
                meta_cache.lookup_tablet_by_key(
                    &table,
                    in_flight.partition_key(),
                    deadline,
                    Box::new(move |result| this.tablet_lookup_finished(&record, result)),
                );
            }
        }
    }

    /// Fails the whole batch: records `error` against every in-flight
    /// operation and completes with `error` as the aggregated status.
    ///
    /// A no-op on an already terminal batcher, so the first status wins.
    pub fn abort(self: &Arc<Self>, error: TernError) {
        {
            let mut inner = self.lock_inner();
            if inner.state.is_terminal() {
                log::debug!(
                    "{}abort requested in terminal state {:?}",
                    self.log_prefix(),
                    inner.state
                );
                return;
            }
            for op in &inner.ops_queue {
                self.error_collector
                    .add_error(Arc::clone(op.op()), error.clone());
            }
            inner.combined_error = Some(error);
            inner.state = BatcherState::Aborted;
        }
        self.flush_finished();
    }

    fn tablet_lookup_finished(
        self: &Arc<Self>,
        op: &Arc<InFlightOp>,
        result: TernResult<Arc<RemoteTablet>>,
    ) {
        match result {
            Ok(tablet) => {
                log::trace!(
                    "{}tablet lookup finished for operation #{}: {}",
                    self.log_prefix(),
                    op.sequence_number(),
                    tablet.tablet_id()
                );
                op.set_tablet(tablet);
            }
            Err(error) => {
                log::debug!(
                    "{}tablet lookup failed for operation #{}: {error}",
                    self.log_prefix(),
                    op.sequence_number()
                );
                op.set_error(error);
            }
        }
        if self.outstanding_lookups.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.all_lookups_done();
        }
    }

    /// Runs exactly once, driven by the last finishing lookup: validates
    /// resolutions, spreads per-key errors, sorts, checks partition-list
    /// versions, and slices the queue into dispatch groups.
    fn all_lookups_done(self: &Arc<Self>) {
        let outcome = {
            let mut inner = self.lock_inner();
            if inner.state != BatcherState::ResolvingTablets {
                if inner.state == BatcherState::Aborted {
                    log::debug!("{}lookups finished after abort", self.log_prefix());
                } else {
                    log::error!(
                        "{}all lookups done in unexpected state {:?}",
                        self.log_prefix(),
                        inner.state
                    );
                }
                return;
            }

            // A stale location cache can route a key to a tablet that no
            // longer owns it. The server would reject the operation, but
            // detecting it here is cheaper and yields a clearer diagnostic.
            for op in &inner.ops_queue {
                if let Some(tablet) = op.tablet() {
                    if !tablet.partition().contains_key(op.partition_key())
                        || self.should_simulate_partition_mismatch()
                    {
                        let message = format!(
                            "row of operation #{} not in partition of tablet {}, partition key: {:02x?}",
                            op.sequence_number(),
                            tablet.tablet_id(),
                            op.partition_key()
                        );
                        log::error!("{}{message}", self.log_prefix());
                        op.set_error(TernError::InternalError(message));
                    }
                }
            }

            let mut errors: HashMap<PartitionKey, TernError> = HashMap::new();
            for op in &inner.ops_queue {
                if let Some(error) = op.error() {
                    errors
                        .entry(op.partition_key().clone())
                        .or_insert(error);
                }
            }

            inner.state = BatcherState::TransactionPrepare;

            if !errors.is_empty() {
                // An error on any operation of a partition key fails every
                // operation of that key; dispatching the survivors would
                // reorder them.
                let queue = std::mem::take(&mut inner.ops_queue);
                let mut retained = Vec::with_capacity(queue.len());
                for op in queue {
                    if !op.has_error() {
                        if let Some(error) = errors.get(op.partition_key()) {
                            op.set_error(error.clone());
                        }
                    }
                    if op.has_error() {
                        self.combine_error(&mut inner, &op);
                    } else {
                        retained.push(op);
                    }
                }
                inner.ops_queue = retained;
            }

            if inner.ops_queue.is_empty() {
                LookupsOutcome::Finish
            } else {
                // Stable on sequence number within equal (tablet, kind), so
                // per-key submission order survives into the RPCs.
                inner.ops_queue.sort_by_key(|op| {
                    (
                        op.tablet().map_or(0, |tablet| Arc::as_ptr(tablet) as usize),
                        op.op().group(),
                        op.sequence_number(),
                    )
                });

                match self.version_mismatch(&inner.ops_queue) {
                    Some(error) => LookupsOutcome::Abort(error),
                    None => {
                        inner.ops_info = Arc::new(Self::group_ops(&inner.ops_queue));
                        LookupsOutcome::Execute
                    }
                }
            }
        };

        match outcome {
            LookupsOutcome::Finish => self.flush_finished(),
            LookupsOutcome::Abort(error) => self.abort(error),
            LookupsOutcome::Execute => self.execute_operations(true),
        }
    }

    fn version_mismatch(&self, ops_queue: &InFlightOps) -> Option<TernError> {
        for op in ops_queue {
            let Some(requested) = op.op().partition_list_version() else {
                continue;
            };
            let Some(tablet) = op.tablet() else {
                continue;
            };
            if requested != tablet.partition_list_version() {
                return Some(TernError::Client {
                    code: ClientErrorCode::TablePartitionListVersionDoesNotMatch,
                    message: format!(
                        "operation #{} requested table partition list version {}, but tablet {} has version {}",
                        op.sequence_number(),
                        requested,
                        tablet.tablet_id(),
                        tablet.partition_list_version()
                    ),
                });
            }
        }
        None
    }

    fn group_ops(ops_queue: &InFlightOps) -> InFlightOpsGroups {
        let mut groups = Vec::new();
        let mut current: InFlightOps = Vec::new();
        for op in ops_queue {
            let same_run = current.first().is_some_and(|head| {
                head.op().group() == op.op().group()
                    && match (head.tablet(), op.tablet()) {
                        (Some(lhs), Some(rhs)) => Arc::ptr_eq(lhs, rhs),
                        _ => false,
                    }
            });
            if !current.is_empty() && !same_run {
                groups.push(InFlightOpsGroup::new(std::mem::take(&mut current)));
            }
            current.push(Arc::clone(op));
        }
        if !current.is_empty() {
            groups.push(InFlightOpsGroup::new(current));
        }
        InFlightOpsGroups::new(groups)
    }

    /// Gates dispatch on the transaction, then builds and sends one RPC
    /// per dispatch group.
    fn execute_operations(self: &Arc<Self>, initial: bool) {
        log::debug!(
            "{}execute operations, initial: {initial}",
            self.log_prefix()
        );

        if let Some(transaction) = self.transaction.clone() {
            // The plan stays installed while the transaction prepares, so a
            // ready callback racing in from another thread re-enters with
            // the same shared groups.
            let (ops_info, deadline) = {
                let inner = self.lock_inner();
                (Arc::clone(&inner.ops_info), inner.deadline)
            };
            let this = Arc::clone(self);
            let ready_now = transaction.prepare(
                &ops_info,
                self.force_consistent_read,
                deadline,
                initial,
                Box::new(move |status| this.transaction_ready(status)),
            );
            if !ready_now {
                return;
            }
        }

        let (ops_info, need_consistent_read) = {
            let mut inner = self.lock_inner();
            if inner.state != BatcherState::TransactionPrepare {
                // Aborted while waiting for the transaction; the abort path
                // already scheduled the callback.
                if inner.state != BatcherState::Aborted {
                    log::error!(
                        "{}transaction became ready in unexpected state {:?}",
                        self.log_prefix(),
                        inner.state
                    );
                }
                return;
            }
            inner.state = BatcherState::TransactionReady;

            // Consistent read is not required when the whole batch fits
            // into one command.
            let need_consistent_read = self.force_consistent_read
                || self.transaction.is_some()
                || inner.ops_info.groups().len() > 1;
            (Arc::clone(&inner.ops_info), need_consistent_read)
        };

        let group_count = ops_info.groups().len();
        let mut rpcs = Vec::with_capacity(group_count);
        for (index, group) in ops_info.groups().iter().enumerate() {
            let Some(tablet) = group.tablet() else {
                log::error!(
                    "{}skipping dispatch group without a resolved tablet",
                    self.log_prefix()
                );
                continue;
            };
            // Local calls would execute inline and block dispatch of the
            // remaining groups, so only the last group may use them.
            let allow_local_calls =
                self.allow_local_calls_in_curr_thread && index + 1 == group_count;
            let data = RpcData {
                batcher: Arc::clone(self),
                tablet: Arc::clone(tablet),
                allow_local_calls,
                need_consistent_read,
                need_metadata: group.need_metadata(),
                ops: group.ops().clone(),
            };
            let rpc = match group.group() {
                Some(OpGroup::Write) => BatchRpc::write(data),
                Some(OpGroup::LeaderRead) => BatchRpc::read(data, ConsistencyLevel::Strong),
                Some(OpGroup::ConsistentPrefixRead) => {
                    BatchRpc::read(data, ConsistencyLevel::ConsistentPrefix)
                }
                None => continue,
            };
            rpcs.push(rpc);
        }

        if rpcs.is_empty() {
            self.abort(TernError::InternalError(
                "no dispatchable groups in a non-empty batch".to_owned(),
            ));
            return;
        }

        self.outstanding_rpcs.store(rpcs.len(), Ordering::Release);
        for rpc in &rpcs {
            if let Some(transaction) = &self.transaction {
                if let Some(trace) = transaction.trace() {
                    trace.add_child_trace(Arc::clone(rpc.trace()));
                }
            }
            rpc.send();
        }
    }

    fn transaction_ready(self: &Arc<Self>, status: TernResult<()>) {
        match status {
            Ok(()) => self.execute_operations(false),
            Err(error) => self.abort(error),
        }
    }

    pub(crate) fn process_rpc_status(&self, rpc: &BatchRpc, status: &TernResult<()>) {
        {
            let inner = self.lock_inner();
            if inner.state != BatcherState::TransactionReady {
                log::error!(
                    "{}completion of {rpc:?} in unexpected state {:?}: {status:?}",
                    self.log_prefix(),
                    inner.state
                );
                return;
            }
        }
        if let Err(error) = status {
            for op in rpc.ops() {
                op.set_error(error.clone());
            }
        }
    }

    pub(crate) fn process_read_response(&self, rpc: &BatchRpc, status: &TernResult<()>) {
        self.process_rpc_status(rpc, status);
    }

    pub(crate) fn process_write_response(
        &self,
        rpc: &BatchRpc,
        status: &TernResult<()>,
        response: &WriteResponse,
    ) {
        self.process_rpc_status(rpc, status);

        if status.is_ok() {
            if let Some(propagated) = response.propagated_hybrid_time {
                self.client.update_latest_observed_hybrid_time(propagated);
            }
        }

        for row_error in &response.per_row_errors {
            let Some(op) = rpc.ops().get(row_error.row_index) else {
                log::error!(
                    "{}received a per-row error for out-of-bound op index {} (sent only {} ops) from tablet {}",
                    self.log_prefix(),
                    row_error.row_index,
                    rpc.ops().len(),
                    rpc.tablet().tablet_id()
                );
                continue;
            };
            log::debug!(
                "{}error on operation #{}: {}",
                self.log_prefix(),
                op.sequence_number(),
                row_error.error
            );
            op.set_error(row_error.error.clone());
        }
    }

    /// Joins the RPC rendezvous; the completion that drives the counter to
    /// zero folds every recorded error into the collector and finishes the
    /// flush.
    pub(crate) fn flushed(
        self: &Arc<Self>,
        ops: &InFlightOps,
        status: &TernResult<()>,
        extra: FlushExtraResult,
    ) {
        if let Some(transaction) = &self.transaction {
            // Operations the session retries within the same transaction
            // stay in the transaction's running set until the retry
            // resolves them.
            let ops_will_be_retried = matches!(status, Err(error) if should_session_retry(error));
            if !ops_will_be_retried {
                transaction.flushed(ops, extra.used_read_time, status);
            }
        }
        if status.is_ok() {
            if let (Some(read_point), Some(propagated)) =
                (&self.read_point, extra.propagated_hybrid_time)
            {
                read_point.update_clock(propagated);
            }
        }

        if self.outstanding_rpcs.fetch_sub(1, Ordering::AcqRel) == 1 {
            {
                let mut inner = self.lock_inner();
                let queue = inner.ops_queue.clone();
                for op in &queue {
                    if op.has_error() {
                        self.combine_error(&mut inner, op);
                    }
                }
            }
            self.flush_finished();
        }
    }

    /// Folds one failed operation into the error collector and, when the
    /// combine knob is set, into the aggregated status.
    fn combine_error(&self, inner: &mut BatcherInner, op: &Arc<InFlightOp>) {
        let Some(error) = op.error() else {
            return;
        };

        // The location cache has no write access to table handles, so a
        // stale-partition-list code is translated here into the flag the
        // next metadata fetch checks.
        if error.client_error_code() == Some(ClientErrorCode::TablePartitionListIsStale) {
            op.op().table().mark_partition_list_stale();
        }

        self.error_collector
            .add_error(Arc::clone(op.op()), error.clone());

        if self.test_config.combine_errors {
            match &inner.combined_error {
                None => inner.combined_error = Some(error),
                Some(TernError::Combined) => {}
                Some(existing) => {
                    if !existing.same_kind(&error) {
                        inner.combined_error = Some(TernError::Combined);
                    }
                }
            }
        }
    }

    /// First entry into a terminal state: fixes up the aggregated status,
    /// notifies the session, and schedules the callback.
    fn flush_finished(self: &Arc<Self>) {
        let has_callback = {
            let mut inner = self.lock_inner();
            if inner.state != BatcherState::Aborted {
                inner.state = BatcherState::Complete;
            }
            if inner.combined_error.is_none() && self.error_collector.error_count() != 0 {
                // Callers drain per-operation detail from the collector;
                // the aggregated status only signals that failures exist.
                inner.combined_error = Some(TernError::TabletErrors);
            }
            inner.flush_callback.is_some()
        };

        if let Some(session) = self.weak_session.upgrade() {
            session.flush_finished(self);
        }

        if has_callback {
            self.run_callback();
        }
    }

    fn run_callback(self: &Arc<Self>) {
        if let Some(pool) = self.client.callback_pool() {
            let this = Arc::clone(self);
            if pool.submit(Box::new(move || this.run())).is_ok() {
                return;
            }
        }
        self.run();
    }

    fn run(self: &Arc<Self>) {
        let (callback, status) = {
            let mut inner = self.lock_inner();
            let status = inner.combined_error.clone().map_or(Ok(()), Err);
            (inner.flush_callback.take(), status)
        };
        match callback {
            Some(callback) => callback(status),
            None => log::warn!("{}flush callback already consumed", self.log_prefix()),
        }
    }

    fn should_simulate_partition_mismatch(&self) -> bool {
        let probability = self.test_config.simulate_partition_mismatch_probability;
        probability > 0.0 && rand::thread_rng().gen_bool(probability.min(1.0))
    }

    fn lock_inner(&self) -> MutexGuard<'_, BatcherInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_prefix(&self) -> String {
        let this: *const Batcher = self;
        format!("batcher {this:p}: ")
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        let outstanding = self.outstanding_rpcs.load(Ordering::Acquire);
        if outstanding != 0 {
            log::error!("dropping batcher with {outstanding} outstanding rpcs");
            debug_assert_eq!(outstanding, 0, "dropping batcher with outstanding rpcs");
        }
        let state = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .state;
        let clean = matches!(
            state,
            BatcherState::GatheringOps | BatcherState::Complete | BatcherState::Aborted
        );
        if !clean {
            log::error!("dropping batcher in state {state:?}");
            debug_assert!(clean, "dropping batcher in state {state:?}");
        }
    }
}
