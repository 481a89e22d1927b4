//! Monotonic synchronizer state flags.
//! Grounded in the teacher's `rebuild_state.rs` module split (name only
//! retrieved from `rebuild/mod.rs`); the flags themselves come straight
//! from the per-source state described in §3 of the data model
//! (`should_stop`/`succeeded`/`done`, monotonic transitions only).
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared between the thread running a synchronizer's loop and any other
/// thread observing its progress (a `JobHandle`, the Coordinator). Every
/// transition here is one-directional: once true, a flag never reverts.
#[derive(Debug, Default)]
pub struct SyncState {
    should_stop: AtomicBool,
    succeeded: AtomicBool,
    done: AtomicBool,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    pub fn mark_succeeded(&self) {
        self.succeeded.store(true, Ordering::SeqCst);
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}
