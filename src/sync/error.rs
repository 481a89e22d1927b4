//! `SyncError`: every failure that is fatal to a
//! single synchronizer. Grounded in mayastor's `rebuild_error` enum
//! (retrieved only by name from `rebuild/mod.rs`'s `use rebuild_error::...`);
//! the variant set here is rebuilt from the failure modes this crate
//! actually has, since mayastor's own variants are SPDK/gRPC-specific.

use snafu::Snafu;

use crate::device::DeviceError;
use crate::device::DeviceId;
use crate::lock::LockError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("source and destination are the same device ({device})"))]
    SameDevice { device: DeviceId },

    #[snafu(display(
        "source size {source_size} does not match destination size {destination_size}"
    ))]
    SizeMismatch {
        source_size: u64,
        destination_size: u64,
    },

    #[snafu(display("{device}: no baseline exists (zero unsynced sectors at construction)"))]
    NoBaseline { device: DeviceId },

    #[snafu(display("{device}: could not acquire device lock: {source}"))]
    LockContention { device: DeviceId, source: LockError },

    #[snafu(display("{device}: I/O error during sync: {source}"))]
    Io { device: DeviceId, source: DeviceError },

    #[snafu(display("{device}: unexpected EOF at sector offset {offset}"))]
    UnexpectedEof { device: DeviceId, offset: u64 },

    #[snafu(display("{device}: freeze/thaw failed: {source}"))]
    FreezeThaw { device: DeviceId, source: DeviceError },

    #[snafu(display("{device}: workload did not converge within the history window"))]
    NonConvergent { device: DeviceId },

    #[snafu(display("{device}: synchronizer panicked: {message}"))]
    Panicked { device: DeviceId, message: String },
}
