//! The device tracer binding: turns raw change-tracking
//! events from the kernel into [`Store::add_interval`] calls. The kernel
//! module itself is external; this is the adapter over it.

pub mod fake;
pub mod kernel;

use std::sync::Arc;

use snafu::Snafu;

use crate::device::DeviceId;
use crate::interval::Store;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TracerError {
    #[snafu(display("{device}: failed to start tracer: {source}"))]
    Start {
        device: DeviceId,
        source: std::io::Error,
    },
    #[snafu(display("{device}: tracer is not running"))]
    NotStarted { device: DeviceId },
}

/// Converts a kernel change-tracking source into interval additions against
/// a device's [`Store`]. Implementations push events to the Store from a
/// dedicated delivery thread per device.
pub trait Tracer: Send + Sync {
    /// Idempotent: after return, writes to `device` are observable as
    /// interval additions against `store`. Fatal to the surrounding backup
    /// job if it returns an error.
    fn start(&self, device: DeviceId, store: Arc<Store>) -> Result<(), TracerError>;

    /// Returns only once every event already pending for `device` has been
    /// delivered to its Store.
    fn flush(&self, device: DeviceId) -> Result<(), TracerError>;

    /// Ceases delivery; further writes to `device` are untracked.
    fn stop(&self, device: DeviceId) -> Result<(), TracerError>;

    /// True if `start` has been called for `device` and `stop` has not.
    fn is_tracing(&self, device: DeviceId) -> bool;
}
