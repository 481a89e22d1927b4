//! The block-device capability abstraction: a small trait
//! implemented by a local block-special/regular file device and a remote
//! TCP-reachable device, branched on at construction time rather than
//! through a deeper inheritance hierarchy — the shape mayastor's own
//! `BlockDevice`/`BlockDeviceDescriptor`/`BlockDeviceHandle` split uses,
//! simplified down to what the synchronizer actually calls.

pub mod local;
pub mod remote;

use snafu::Snafu;

use crate::interval::SectorInterval;

/// Stable device identity. The core keys all per-source state off this
/// pair; a UUID or label is resolved to
/// one of these once, outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

impl DeviceId {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeviceError {
    #[snafu(display("{device}: failed to open: {source}"))]
    Open {
        device: String,
        source: std::io::Error,
    },
    #[snafu(display("{device}: failed to query size: {source}"))]
    SizeQuery {
        device: String,
        source: std::io::Error,
    },
    #[snafu(display("{device}: I/O error at offset {offset}: {source}"))]
    Io {
        device: String,
        offset: u64,
        source: std::io::Error,
    },
    #[snafu(display("{device}: short read at offset {offset}: unexpected EOF"))]
    UnexpectedEof { device: String, offset: u64 },
    #[snafu(display("{device}: freeze failed: {source}"))]
    Freeze {
        device: String,
        source: std::io::Error,
    },
    #[snafu(display("{device}: thaw failed: {source}"))]
    Thaw {
        device: String,
        source: std::io::Error,
    },
    #[snafu(display("{device}: does not support a filesystem-aware scan"))]
    InUseSectorsUnsupported { device: String },
}

/// The capability set a synchronizer needs from either endpoint of a copy.
///
/// `freeze`/`thaw`/`in_use_sectors` are optional capabilities: a remote
/// destination has no local filesystem to freeze, so its implementations
/// are no-ops, and only a source that is also a mounted filesystem
/// implements `in_use_sectors` meaningfully.
pub trait BlockDevice: Send + Sync {
    /// Stable identity, used for locking and logging.
    fn id(&self) -> DeviceId;

    /// Human-readable path or URI, for logging only.
    fn path(&self) -> &str;

    /// Total addressable size in bytes.
    fn size_bytes(&self) -> u64;

    /// The device's preferred I/O unit, in bytes. Always a multiple of 512.
    fn block_size_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes starting at `offset`, or an error.
    /// Implementations loop internally on short reads.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Write exactly `buf.len()` bytes starting at `offset`.
    /// Implementations loop internally on short writes.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError>;

    /// Freeze the filesystem mounted on this device, if any. Default is a
    /// no-op for devices with no mounted filesystem (e.g. a remote
    /// destination).
    fn freeze(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Thaw a previously frozen filesystem. Must be safe to call even if
    /// `freeze` was never called or already failed (thaw is
    /// guaranteed on every exit path).
    fn thaw(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// The set of sectors currently backing live filesystem data, used to
    /// seed a full backup. Devices with no filesystem-aware
    /// scan return `InUseSectorsUnsupported`.
    fn in_use_sectors(&self) -> Result<Vec<SectorInterval>, DeviceError> {
        Err(DeviceError::InUseSectorsUnsupported {
            device: self.path().to_string(),
        })
    }
}

pub(crate) const SECTOR_SIZE: u64 = 512;
