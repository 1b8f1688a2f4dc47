//! User operations and their grouping classification.

use std::sync::Arc;

use tern_common::error::TernResult;
use tern_common::ids::{PartitionKey, PartitionListVersion};

use crate::meta_cache::RemoteTablet;
use crate::table::TableHandle;

/// Disjoint operation kinds selecting the RPC path and consistency.
///
/// The derived order is the order groups are laid out in after sorting, so
/// writes of a tablet always precede its reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpGroup {
    /// Row mutation, routed to the tablet leader.
    Write,
    /// Strongly consistent read, routed to the tablet leader.
    LeaderRead,
    /// Relaxed read that may observe a consistent prefix.
    ConsistentPrefixRead,
}

/// One user-submitted row operation.
///
/// Operations are shared as `Arc<Operation>` between the caller and the
/// batch runtime and stay read-only for the whole flush; all mutable
/// flush state lives in the per-flush in-flight records.
#[derive(Debug)]
pub struct Operation {
    table: Arc<TableHandle>,
    group: OpGroup,
    row_key: Vec<u8>,
    payload: Vec<u8>,
    partition_list_version: Option<PartitionListVersion>,
    tablet_hint: Option<Arc<RemoteTablet>>,
}

impl Operation {
    /// Creates an operation of the given kind.
    #[must_use]
    pub fn new(
        table: Arc<TableHandle>,
        group: OpGroup,
        row_key: impl Into<Vec<u8>>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            table,
            group,
            row_key: row_key.into(),
            payload: payload.into(),
            partition_list_version: None,
            tablet_hint: None,
        }
    }

    /// Pins the partition-list version this operation was planned against.
    ///
    /// A flush aborts when the pinned version no longer matches the
    /// version of the resolved tablet.
    #[must_use]
    pub fn with_partition_list_version(mut self, version: PartitionListVersion) -> Self {
        self.partition_list_version = Some(version);
        self
    }

    /// Attaches an already resolved tablet, skipping the lookup for this
    /// operation.
    #[must_use]
    pub fn with_tablet_hint(mut self, tablet: Arc<RemoteTablet>) -> Self {
        self.tablet_hint = Some(tablet);
        self
    }

    /// Returns the table this operation targets.
    #[must_use]
    pub fn table(&self) -> &Arc<TableHandle> {
        &self.table
    }

    /// Returns the grouping kind.
    #[must_use]
    pub fn group(&self) -> OpGroup {
        self.group
    }

    /// Returns true for operations that never mutate rows.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.group != OpGroup::Write
    }

    /// Returns the raw row key.
    #[must_use]
    pub fn row_key(&self) -> &[u8] {
        &self.row_key
    }

    /// Returns the opaque operation payload handed to the wire encoder.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Derives the encoded partition key under the table's schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the row key cannot be encoded.
    pub fn partition_key(&self) -> TernResult<PartitionKey> {
        self.table
            .partition_schema()
            .encode_partition_key(&self.row_key)
    }

    /// Returns the pinned partition-list version, if any.
    #[must_use]
    pub fn partition_list_version(&self) -> Option<PartitionListVersion> {
        self.partition_list_version
    }

    /// Returns the attached tablet hint, if any.
    #[must_use]
    pub fn tablet_hint(&self) -> Option<&Arc<RemoteTablet>> {
        self.tablet_hint.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{OpGroup, Operation};
    use crate::table::{PartitionSchema, TableHandle};
    use googletest::prelude::*;
    use rstest::rstest;

    fn hash_table() -> Arc<TableHandle> {
        Arc::new(TableHandle::new(
            "t-orders".to_owned(),
            "orders",
            PartitionSchema::Hash,
            1,
        ))
    }

    #[rstest]
    #[case(OpGroup::Write, false)]
    #[case(OpGroup::LeaderRead, true)]
    #[case(OpGroup::ConsistentPrefixRead, true)]
    fn read_only_follows_the_group(#[case] group: OpGroup, #[case] expected: bool) {
        let op = Operation::new(hash_table(), group, b"k".as_slice(), b"v".as_slice());
        assert_that!(op.read_only(), eq(expected));
    }

    #[rstest]
    fn partition_key_uses_the_table_schema() {
        let op = Operation::new(
            hash_table(),
            OpGroup::Write,
            b"user:7".as_slice(),
            b"row".as_slice(),
        );
        let key = op.partition_key().expect("hash key must encode");
        assert_that!(key.len(), eq(2_usize));
    }

    #[rstest]
    fn group_order_places_writes_first() {
        assert_that!(OpGroup::Write < OpGroup::LeaderRead, eq(true));
        assert_that!(
            OpGroup::LeaderRead < OpGroup::ConsistentPrefixRead,
            eq(true)
        );
    }
}
