//! Out-of-band store for per-operation flush errors.

use std::sync::{Arc, Mutex, PoisonError};

use tern_common::error::TernError;

use crate::op::Operation;

/// One failed operation together with the status that failed it.
#[derive(Debug, Clone)]
pub struct OperationError {
    op: Arc<Operation>,
    error: TernError,
}

impl OperationError {
    /// Creates an error record.
    #[must_use]
    pub fn new(op: Arc<Operation>, error: TernError) -> Self {
        Self { op, error }
    }

    /// Returns the failed operation.
    #[must_use]
    pub fn op(&self) -> &Arc<Operation> {
        &self.op
    }

    /// Returns the failing status.
    #[must_use]
    pub fn error(&self) -> &TernError {
        &self.error
    }
}

/// Errors drained from one flush attempt.
pub type CollectedErrors = Vec<OperationError>;

/// Accumulates per-operation errors for the session to drain after flush.
///
/// The collector is internally synchronized: the batch runtime appends
/// while the session may drain concurrently from its own callbacks.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Mutex<CollectedErrors>,
}

impl ErrorCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one per-operation error.
    pub fn add_error(&self, op: Arc<Operation>, error: TernError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OperationError::new(op, error));
    }

    /// Returns the number of collected errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drains and returns every collected error.
    #[must_use]
    pub fn get_and_clear_errors(&self) -> CollectedErrors {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
