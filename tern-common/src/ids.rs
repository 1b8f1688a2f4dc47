//! Canonical identifier types used across the client runtime.

/// Globally unique tablet identifier assigned by the master.
pub type TabletId = String;

/// Globally unique table identifier.
pub type TableId = String;

/// Retryable-request identifier scoped to one (client, tablet) pair.
pub type RequestId = u64;

/// Zero-based submission index of an operation within one batch.
pub type SequenceNumber = usize;

/// Version counter of a table's partition list; bumped by splits and merges.
pub type PartitionListVersion = u32;

/// Opaque bytes that map a row to its owning tablet under the table's
/// partition schema.
pub type PartitionKey = Vec<u8>;
