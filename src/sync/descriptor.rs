//! `SyncDescriptor`: the validated,
//! opened pair of devices a `Synchronizer` copies between. Grounded almost
//! field-for-field in mayastor's `rebuild_descriptor.rs` (block size,
//! source/destination handles, start time).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use snafu::ensure;

use crate::device::BlockDevice;
use crate::interval::Store;

use super::error::{SameDeviceSnafu, SizeMismatchSnafu, SyncError};

/// The device identity pair plus block-size arithmetic a synchronizer needs
/// for the lifetime of one sync job. Construction enforces the §4.4
/// preconditions that do not depend on the Store's current contents
/// (same-device, size match); the zero-unsynced check and the device lock
/// are acquired one layer up, in `Synchronizer::new`, since they require
/// the Store and the lock directory respectively.
pub struct SyncDescriptor {
    pub source: Arc<dyn BlockDevice>,
    pub destination: Arc<dyn BlockDevice>,
    pub store: Arc<Store>,
    pub block_size_bytes: u64,
    pub sectors_per_block: u64,
    pub started_at: DateTime<Utc>,
}

impl SyncDescriptor {
    pub fn new(
        source: Arc<dyn BlockDevice>,
        destination: Arc<dyn BlockDevice>,
        store: Arc<Store>,
    ) -> Result<Self, SyncError> {
        ensure!(
            source.id() != destination.id(),
            SameDeviceSnafu { device: source.id() }
        );
        ensure!(
            source.size_bytes() == destination.size_bytes(),
            SizeMismatchSnafu {
                source_size: source.size_bytes(),
                destination_size: destination.size_bytes(),
            }
        );

        let block_size_bytes = source.block_size_bytes();
        let sectors_per_block = block_size_bytes / crate::device::SECTOR_SIZE;

        Ok(Self {
            source,
            destination,
            store,
            block_size_bytes,
            sectors_per_block,
            started_at: Utc::now(),
        })
    }
}
