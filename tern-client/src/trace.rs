//! Lightweight trace nodes linking batch RPCs to their transaction.

use std::sync::{Arc, Mutex, PoisonError};

/// Named trace node with child links.
///
/// A transaction exposes its trace so each batch RPC can attach its own
/// node, which keeps per-request diagnostics navigable from the
/// transaction downwards.
#[derive(Debug, Default)]
pub struct Trace {
    name: String,
    children: Mutex<Vec<Arc<Trace>>>,
}

impl Trace {
    /// Creates a named trace node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Links a child trace under this node.
    pub fn add_child_trace(&self, child: Arc<Trace>) {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
    }

    /// Returns the currently linked children.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Trace>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
