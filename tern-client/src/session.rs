//! Session-facing hooks and retry classification.

use std::sync::Arc;

use tern_common::error::{ClientErrorCode, TernError};

use crate::batcher::Batcher;

/// Flush lifecycle notifications delivered to the owning session.
///
/// The batch runtime holds the session weakly and tolerates it being gone;
/// hooks are never invoked while the batcher's own lock is held, so a
/// session may take its lock freely.
pub trait SessionHooks: Send + Sync {
    /// A flush left the gathering state.
    fn flush_started(&self, batcher: &Arc<Batcher>);

    /// A flush reached a terminal state; per-op errors are ready to drain.
    fn flush_finished(&self, batcher: &Arc<Batcher>);
}

/// Source of server rejection scores used for backoff decisions.
pub trait RejectionScoreSource: Send + Sync {
    /// Returns the rejection score for the given attempt number.
    fn score(&self, attempt: i32) -> f64;
}

/// Returns true when the session retries this error itself by refreshing
/// shard metadata and building a fresh batch.
///
/// Such errors are not reported to an attached transaction as flushed:
/// the operations stay in the transaction's running set until the retry
/// resolves them.
#[must_use]
pub fn should_session_retry(error: &TernError) -> bool {
    matches!(
        error.client_error_code(),
        Some(
            ClientErrorCode::TablePartitionListIsStale
                | ClientErrorCode::TablePartitionListVersionDoesNotMatch
        )
    )
}
