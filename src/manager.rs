//! The unsynced sector manager: the per-process registry
//! binding each source device to exactly one [`Store`] and at most one
//! active [`Tracer`]. Grounded in the reference implementation's
//! `UnsyncedSectorManager`/`IsTracing`/`StartTracer`/`GetStore` trio
//! (`original_source/backup/backup_builder.cc`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::DeviceId;
use crate::interval::Store;
use crate::tracer::{Tracer, TracerError};

struct SourceState {
    store: Arc<Store>,
    tracing: bool,
}

/// Owns every source device's Store and tracing state for the life of the
/// daemon process (scoped to the daemon instance, not a
/// process-wide singleton — callers hold this behind an `Arc` they
/// construct once at startup).
pub struct UnsyncedSectorManager {
    tracer: Arc<dyn Tracer>,
    sources: Mutex<HashMap<DeviceId, SourceState>>,
}

impl UnsyncedSectorManager {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the Store for `device`, creating one if this is the first
    /// time the device has been seen (invariant: creating a
    /// Store for an already-registered device returns the existing one).
    pub fn get_store(&self, device: DeviceId) -> Arc<Store> {
        let mut sources = self.sources.lock();
        Arc::clone(
            &sources
                .entry(device)
                .or_insert_with(|| SourceState {
                    store: Arc::new(Store::new()),
                    tracing: false,
                })
                .store,
        )
    }

    pub fn is_tracing(&self, device: DeviceId) -> bool {
        self.sources
            .lock()
            .get(&device)
            .map(|s| s.tracing)
            .unwrap_or(false)
    }

    /// Starts the tracer for `device` if it is not already running.
    /// Idempotent, matching `Tracer::start`'s own contract.
    pub fn start_tracer(&self, device: DeviceId) -> Result<(), TracerError> {
        let store = self.get_store(device);
        self.tracer.start(device, store)?;
        self.sources.lock().entry(device).and_modify(|s| s.tracing = true);
        Ok(())
    }

    pub fn flush_tracer(&self, device: DeviceId) -> Result<(), TracerError> {
        self.tracer.flush(device)
    }

    pub fn stop_tracer(&self, device: DeviceId) -> Result<(), TracerError> {
        self.tracer.stop(device)?;
        self.sources.lock().entry(device).and_modify(|s| s.tracing = false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::fake::FakeTracer;
    use crate::interval::SectorInterval;

    #[test]
    fn get_store_returns_the_same_instance_for_a_device() {
        let manager = UnsyncedSectorManager::new(Arc::new(FakeTracer::new()));
        let device = DeviceId::new(8, 0);

        let a = manager.get_store(device);
        let b = manager.get_store(device);
        a.add_interval(SectorInterval::new(0, 8));
        assert_eq!(b.unsynced_sector_count(), 8);
    }

    #[test]
    fn start_tracer_marks_the_device_as_tracing() {
        let manager = UnsyncedSectorManager::new(Arc::new(FakeTracer::new()));
        let device = DeviceId::new(8, 0);

        assert!(!manager.is_tracing(device));
        manager.start_tracer(device).unwrap();
        assert!(manager.is_tracing(device));
    }

    #[test]
    fn stop_tracer_clears_tracing_flag() {
        let manager = UnsyncedSectorManager::new(Arc::new(FakeTracer::new()));
        let device = DeviceId::new(8, 0);

        manager.start_tracer(device).unwrap();
        manager.stop_tracer(device).unwrap();
        assert!(!manager.is_tracing(device));
    }
}
