//! Tablet-location resolution facade.
//!
//! The batch runtime never talks to the master directly; it resolves keys
//! through this trait and receives shard handles whose partition bounds it
//! can validate locally.

use std::sync::Arc;
use std::time::Instant;

use tern_common::error::TernResult;
use tern_common::ids::{PartitionListVersion, TabletId};

use crate::table::{Partition, TableHandle};

/// Client-side handle for one remote tablet.
///
/// Handles are shared and compared by identity: two operations belong to
/// the same dispatch group only when they resolved to the same handle.
#[derive(Debug)]
pub struct RemoteTablet {
    tablet_id: TabletId,
    partition: Partition,
    partition_list_version: PartitionListVersion,
}

impl RemoteTablet {
    /// Creates a tablet handle.
    #[must_use]
    pub fn new(
        tablet_id: TabletId,
        partition: Partition,
        partition_list_version: PartitionListVersion,
    ) -> Self {
        Self {
            tablet_id,
            partition,
            partition_list_version,
        }
    }

    /// Returns the tablet identifier.
    #[must_use]
    pub fn tablet_id(&self) -> &TabletId {
        &self.tablet_id
    }

    /// Returns the partition owned by this tablet.
    #[must_use]
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Returns the partition-list version of the owning table at the time
    /// this handle was fetched.
    #[must_use]
    pub fn partition_list_version(&self) -> PartitionListVersion {
        self.partition_list_version
    }
}

/// Completion callback of one tablet lookup.
pub type TabletLookupCallback = Box<dyn FnOnce(TernResult<Arc<RemoteTablet>>) + Send>;

/// Asynchronous key-to-tablet resolver.
///
/// Implementations may invoke the callback inline from `lookup_tablet_by_key`
/// or later from any thread; callers must be prepared for both.
pub trait MetaCache: Send + Sync {
    /// Resolves the tablet owning `partition_key` in `table`.
    ///
    /// The deadline is advisory and propagated to any remote fetch the
    /// implementation performs; an expired deadline surfaces as an error
    /// through the callback, never as a dropped callback.
    fn lookup_tablet_by_key(
        &self,
        table: &Arc<TableHandle>,
        partition_key: &[u8],
        deadline: Option<Instant>,
        callback: TabletLookupCallback,
    );
}
