//! Shared error model for cross-crate APIs.

use std::fmt;

use thiserror::Error;

/// Unified result type used by all public interfaces in `tern-rs`.
pub type TernResult<T> = Result<T, TernError>;

/// Machine-readable codes that ride on statuses handed back to the session.
///
/// The session matches on these codes to decide whether cached shard
/// metadata must be refreshed before it constructs a retry batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorCode {
    /// The cached partition list of a table is older than the one the
    /// master currently serves.
    TablePartitionListIsStale,
    /// An operation pinned a partition-list version that no longer matches
    /// the version reported by its resolved tablet.
    TablePartitionListVersionDoesNotMatch,
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TablePartitionListIsStale => "table partition list is stale",
            Self::TablePartitionListVersionDoesNotMatch => {
                "table partition list version does not match"
            }
        };
        f.write_str(name)
    }
}

/// Status categories used across the client runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TernError {
    /// Runtime state does not allow this operation.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Caller supplied an argument the runtime cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A client-side invariant was broken, e.g. stale shard metadata routed
    /// a row to a tablet that does not own it.
    #[error("internal error: {0}")]
    InternalError(String),

    /// Network or tablet-server I/O failed.
    #[error("io error: {0}")]
    Io(String),

    /// A deadline elapsed before the operation finished.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// The batch was aborted before dispatch completed.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A status carrying a [`ClientErrorCode`] the session retry policy
    /// understands.
    #[error("{message} ({code})")]
    Client {
        /// Code the session retry policy matches on.
        code: ClientErrorCode,
        /// Human-readable context.
        message: String,
    },

    /// Aggregate flush status when individual operations failed; per-op
    /// detail is drained from the error collector.
    #[error("errors occurred while reaching out to the tablet servers")]
    TabletErrors,

    /// Aggregate flush status when error combining is enabled and failed
    /// operations carry more than one error kind.
    #[error("multiple failures")]
    Combined,
}

impl TernError {
    /// Returns the client error code when this status carries one.
    #[must_use]
    pub fn client_error_code(&self) -> Option<ClientErrorCode> {
        match self {
            Self::Client { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true when both statuses belong to the same error kind,
    /// ignoring messages and codes.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientErrorCode, TernError};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn client_error_code_is_extracted_from_client_statuses() {
        let error = TernError::Client {
            code: ClientErrorCode::TablePartitionListIsStale,
            message: "lookup raced a partition split".to_owned(),
        };
        assert_that!(
            error.client_error_code(),
            eq(Some(ClientErrorCode::TablePartitionListIsStale))
        );
    }

    #[rstest]
    #[case(TernError::TabletErrors)]
    #[case(TernError::Io("connection reset".to_owned()))]
    #[case(TernError::IllegalState("flush already started".to_owned()))]
    fn client_error_code_is_absent_from_plain_statuses(#[case] error: TernError) {
        assert_that!(error.client_error_code(), eq(None));
    }

    #[rstest]
    fn same_kind_ignores_messages() {
        let first = TernError::Io("host a unreachable".to_owned());
        let second = TernError::Io("host b unreachable".to_owned());
        assert_that!(first.same_kind(&second), eq(true));
        assert_that!(first.same_kind(&TernError::TabletErrors), eq(false));
    }

    #[rstest]
    fn tablet_errors_status_has_a_stable_message() {
        assert_that!(
            TernError::TabletErrors.to_string().as_str(),
            eq("errors occurred while reaching out to the tablet servers")
        );
    }
}
