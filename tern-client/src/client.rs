//! Client-process context consumed by the batch runtime.

use std::sync::Arc;

use tern_common::error::TernResult;
use tern_common::hybrid_time::HybridTime;
use tern_common::ids::{RequestId, TabletId};

use crate::meta_cache::MetaCache;
use crate::rpc::RpcMessenger;

/// Deferred unit of work handed to a callback pool.
pub type CallbackTask = Box<dyn FnOnce() + Send>;

/// Executor for user-visible completion callbacks.
///
/// Keeping user callbacks off transport threads stops a slow callback from
/// stalling RPC completions; the batch runtime falls back to inline
/// execution when submission fails.
pub trait CallbackPool: Send + Sync {
    /// Submits a task for asynchronous execution.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool cannot accept the task, e.g. during
    /// shutdown. The caller then runs the task inline.
    fn submit(&self, task: CallbackTask) -> TernResult<()>;
}

/// Process-wide client services shared by every session and batch.
pub trait ClientContext: Send + Sync {
    /// Returns the pool user callbacks are dispatched on, when one exists.
    fn callback_pool(&self) -> Option<Arc<dyn CallbackPool>>;

    /// Returns the tablet-location resolver.
    fn meta_cache(&self) -> Arc<dyn MetaCache>;

    /// Returns the transport used to send batch RPCs.
    fn messenger(&self) -> Arc<dyn RpcMessenger>;

    /// Allocates a retryable request id for a tablet, returning it along
    /// with the lowest request id still running against that tablet.
    fn next_request_id_and_min_running(&self, tablet_id: &TabletId) -> (RequestId, RequestId);

    /// Releases a retryable request id once its RPC finished.
    fn request_finished(&self, tablet_id: &TabletId, request_id: RequestId);

    /// Folds a hybrid time propagated by a tablet server into the client's
    /// observed high-water mark.
    fn update_latest_observed_hybrid_time(&self, ht: HybridTime);
}
