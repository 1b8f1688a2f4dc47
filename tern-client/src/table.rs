//! Table handles, partition schemas, and partition bounds.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tern_common::error::TernResult;
use tern_common::ids::{PartitionKey, PartitionListVersion, TableId};

/// Half-open range of partition-key space owned by one tablet.
///
/// Empty bounds are open: an empty start covers the lowest keys, an empty
/// end covers the highest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    key_start: PartitionKey,
    key_end: PartitionKey,
}

impl Partition {
    /// Creates a partition over `[key_start, key_end)`.
    #[must_use]
    pub fn new(key_start: PartitionKey, key_end: PartitionKey) -> Self {
        Self { key_start, key_end }
    }

    /// Creates the partition covering the whole key space.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Returns the inclusive start bound.
    #[must_use]
    pub fn key_start(&self) -> &[u8] {
        &self.key_start
    }

    /// Returns the exclusive end bound.
    #[must_use]
    pub fn key_end(&self) -> &[u8] {
        &self.key_end
    }

    /// Checks whether a partition key falls inside this partition.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let after_start = self.key_start.is_empty() || key >= self.key_start.as_slice();
        let before_end = self.key_end.is_empty() || key < self.key_end.as_slice();
        after_start && before_end
    }
}

/// How a table maps row keys onto partition-key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSchema {
    /// Rows are spread by a sixteen-bit hash bucket encoded big-endian, so
    /// byte order of encoded keys matches numeric bucket order.
    Hash,
    /// Rows are ordered by their raw key bytes.
    Range,
}

impl PartitionSchema {
    /// Returns true for hash-partitioned tables.
    #[must_use]
    pub fn is_hash(&self) -> bool {
        matches!(self, Self::Hash)
    }

    /// Encodes the partition key for a row key under this schema.
    ///
    /// Hash schemas produce an empty key for an empty row key; reads use
    /// that to address the whole table, while writes treat it as invalid.
    ///
    /// # Errors
    ///
    /// Returns an error when the row key cannot be encoded under this
    /// schema.
    pub fn encode_partition_key(&self, row_key: &[u8]) -> TernResult<PartitionKey> {
        match self {
            Self::Hash => {
                if row_key.is_empty() {
                    return Ok(Vec::new());
                }
                let mut hasher = DefaultHasher::new();
                row_key.hash(&mut hasher);
                let bucket = (hasher.finish() & 0xFFFF) as u16;
                Ok(bucket.to_be_bytes().to_vec())
            }
            Self::Range => Ok(row_key.to_vec()),
        }
    }
}

/// Shared, client-side view of one table.
///
/// The stale-partition-list flag is the rendezvous between batch error
/// handling and the next metadata fetch: a batch marks it when a lookup
/// reports stale partitions, and the session clears it by installing a
/// fresh partition list.
#[derive(Debug)]
pub struct TableHandle {
    table_id: TableId,
    name: String,
    partition_schema: PartitionSchema,
    partition_list_version: AtomicU32,
    partition_list_stale: AtomicBool,
}

impl TableHandle {
    /// Creates a table handle.
    #[must_use]
    pub fn new(
        table_id: TableId,
        name: impl Into<String>,
        partition_schema: PartitionSchema,
        partition_list_version: PartitionListVersion,
    ) -> Self {
        Self {
            table_id,
            name: name.into(),
            partition_schema,
            partition_list_version: AtomicU32::new(partition_list_version),
            partition_list_stale: AtomicBool::new(false),
        }
    }

    /// Returns the table identifier.
    #[must_use]
    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    /// Returns the human-readable table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the partition schema.
    #[must_use]
    pub fn partition_schema(&self) -> PartitionSchema {
        self.partition_schema
    }

    /// Returns the currently cached partition-list version.
    #[must_use]
    pub fn partition_list_version(&self) -> PartitionListVersion {
        self.partition_list_version.load(Ordering::Acquire)
    }

    /// Flags the cached partition list as stale so the next metadata fetch
    /// refreshes it.
    pub fn mark_partition_list_stale(&self) {
        self.partition_list_stale.store(true, Ordering::Release);
    }

    /// Returns true when the cached partition list was flagged stale.
    #[must_use]
    pub fn partition_list_is_stale(&self) -> bool {
        self.partition_list_stale.load(Ordering::Acquire)
    }

    /// Installs a freshly fetched partition-list version and clears the
    /// stale flag.
    pub fn set_partition_list_version(&self, version: PartitionListVersion) {
        self.partition_list_version.store(version, Ordering::Release);
        self.partition_list_stale.store(false, Ordering::Release);
    }
}
