//! A deterministic, in-process [`Tracer`] for tests:
//! events are injected on demand via [`FakeTracer::inject`] rather than
//! arriving from a real kernel source, so coarsening and non-convergence
//! scenarios can be driven without real wall-clock time passing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Tracer, TracerError};
use crate::device::DeviceId;
use crate::interval::{SectorInterval, Store};

#[derive(Default)]
pub struct FakeTracer {
    stores: Mutex<HashMap<DeviceId, Arc<Store>>>,
    pending_on_flush: Mutex<HashMap<DeviceId, Vec<SectorInterval>>>,
}

impl FakeTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `iv` directly into `device`'s Store, as if the kernel tracer
    /// had just delivered it. No-op (silently dropped, like a real dropped
    /// event) if the device isn't currently being traced.
    pub fn inject(&self, device: DeviceId, iv: SectorInterval) {
        if let Some(store) = self.stores.lock().get(&device) {
            store.add_interval(iv);
        }
    }

    /// Queue `iv` to be delivered the next time [`Tracer::flush`] is called
    /// for `device`, simulating an event that lands concurrently with a
    /// synchronizer's bulk-phase drain and is only observed once the
    /// synchronizer asks the tracer to flush before its final-phase check.
    /// Deterministic stand-in for a live-write coarsening scenario.
    pub fn inject_on_next_flush(&self, device: DeviceId, iv: SectorInterval) {
        self.pending_on_flush.lock().entry(device).or_default().push(iv);
    }
}

impl Tracer for FakeTracer {
    fn start(&self, device: DeviceId, store: Arc<Store>) -> Result<(), TracerError> {
        self.stores.lock().insert(device, store);
        Ok(())
    }

    fn flush(&self, device: DeviceId) -> Result<(), TracerError> {
        if let Some(pending) = self.pending_on_flush.lock().remove(&device) {
            for iv in pending {
                self.inject(device, iv);
            }
        }
        Ok(())
    }

    fn stop(&self, device: DeviceId) -> Result<(), TracerError> {
        self.stores.lock().remove(&device);
        Ok(())
    }

    fn is_tracing(&self, device: DeviceId) -> bool {
        self.stores.lock().contains_key(&device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_intervals_reach_the_store() {
        let tracer = FakeTracer::new();
        let store = Arc::new(Store::new());
        let device = DeviceId::new(8, 1);

        tracer.start(device, Arc::clone(&store)).unwrap();
        tracer.inject(device, SectorInterval::new(0, 16));

        assert_eq!(store.unsynced_sector_count(), 16);
    }

    #[test]
    fn injection_after_stop_is_dropped() {
        let tracer = FakeTracer::new();
        let store = Arc::new(Store::new());
        let device = DeviceId::new(8, 1);

        tracer.start(device, Arc::clone(&store)).unwrap();
        tracer.stop(device).unwrap();
        tracer.inject(device, SectorInterval::new(0, 16));

        assert_eq!(store.unsynced_sector_count(), 0);
    }
}
