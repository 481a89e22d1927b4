use parking_lot::Mutex;

use super::{sector_interval::SectorInterval, sector_set::SectorSet};

/// Thread-safe wrapper around a [`SectorSet`] for one source device.
///
/// All operations are mutually exclusive at the Store level; a single
/// `parking_lot::Mutex` is sufficient since the hot path is one writer (the
/// tracer binding) and one reader-modifier (the synchronizer).
#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<SectorSet>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SectorSet::new()),
        }
    }

    pub fn add_interval(&self, iv: SectorInterval) {
        self.inner.lock().add_interval(iv);
    }

    pub fn add_nonvolatile_interval(&self, iv: SectorInterval) {
        self.inner.lock().add_nonvolatile_interval(iv);
    }

    pub fn remove_interval(&self, iv: SectorInterval) {
        self.inner.lock().remove_interval(iv);
    }

    pub fn clear_intervals(&self) {
        self.inner.lock().clear_intervals();
    }

    pub fn get_continuous_unsynced(&self) -> SectorInterval {
        self.inner.lock().get_continuous_unsynced()
    }

    pub fn unsynced_sector_count(&self) -> u64 {
        self.inner.lock().unsynced_sector_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_add_and_remove_keep_count_consistent() {
        // One producer (the tracer's role) and one consumer (the
        // synchronizer's role), matching hot-path shape. The
        // consumer is handed each interval only after the producer added
        // it, via a channel, so the final state is deterministic while the
        // two threads still race on the Store's internal lock.
        let store = Arc::new(Store::new());
        let (tx, rx) = std::sync::mpsc::channel::<SectorInterval>();

        let adder = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    let iv = SectorInterval::new(i * 16, i * 16 + 8);
                    store.add_interval(iv);
                    tx.send(iv).unwrap();
                }
            })
        };
        let remover = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for iv in rx {
                    store.remove_interval(iv);
                }
            })
        };

        adder.join().unwrap();
        remover.join().unwrap();

        assert_eq!(store.unsynced_sector_count(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn get_continuous_unsynced_does_not_block_when_empty() {
        let store = Store::new();
        assert!(store.get_continuous_unsynced().is_empty());
    }
}
