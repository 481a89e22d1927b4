//! `Synchronizer`: the per-device bulk/final-phase copy
//! loop. Grounded in `device_synchronizer.cc`'s `StartSync`, restructured
//! to run to completion on an explicitly-joined thread rather than
//! detaching and signaling via flags alone — mayastor's own `RebuildJob`
//! run-loop shape (poll a state flag, copy, sleep) is followed for the
//! loop's structure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use snafu::{ensure, ResultExt};
use tracing::{debug, error, info, warn};

use crate::coordinator::BackupCoordinator;
use crate::device::{DeviceError, DeviceId};
use crate::interval::SectorInterval;
use crate::lock::DeviceLock;
use crate::manager::UnsyncedSectorManager;

use super::descriptor::SyncDescriptor;
use super::error::{FreezeThawSnafu, LockContentionSnafu, NoBaselineSnafu, SyncError, UnexpectedEofSnafu};
use super::state::SyncState;
use super::stats::{ConvergenceHistory, ConvergencePolicy, EndpointsConvergencePolicy, ProgressSink};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// The per-device worker. Constructed once per sync job per
/// source device; `run` is intended to be called from a dedicated thread
/// and consumes `self`.
pub struct Synchronizer {
    device: DeviceId,
    descriptor: SyncDescriptor,
    manager: Arc<UnsyncedSectorManager>,
    _lock: DeviceLock,
    state: Arc<SyncState>,
    history: ConvergenceHistory,
    convergence_policy: Box<dyn ConvergencePolicy>,
    synced_total: AtomicU64,
    sample_interval: Duration,
}

impl Synchronizer {
    /// All preconditions are checked here: same-device and size match
    /// (inside [`SyncDescriptor::new`]), nonzero unsynced count, and an
    /// uncontended device lock. Any violation aborts construction without
    /// side effects.
    pub fn new(
        source: std::sync::Arc<dyn crate::device::BlockDevice>,
        destination: std::sync::Arc<dyn crate::device::BlockDevice>,
        manager: Arc<UnsyncedSectorManager>,
        lock_dir: impl AsRef<std::path::Path>,
    ) -> Result<Self, SyncError> {
        let device = source.id();
        let store = manager.get_store(device);

        ensure!(
            store.unsynced_sector_count() > 0,
            NoBaselineSnafu { device }
        );

        let descriptor = SyncDescriptor::new(source, destination, store)?;

        let lock = DeviceLock::acquire(lock_dir, device)
            .context(LockContentionSnafu { device })?;

        Ok(Self {
            device,
            descriptor,
            manager,
            _lock: lock,
            state: Arc::new(SyncState::new()),
            history: ConvergenceHistory::with_defaults(),
            convergence_policy: Box::new(EndpointsConvergencePolicy),
            synced_total: AtomicU64::new(0),
            sample_interval: SAMPLE_INTERVAL,
        })
    }

    /// Overrides the convergence history and the wall-clock sampling
    /// interval.
    /// Exposed so tests can exercise the same convergence logic on a much
    /// shorter clock instead of waiting out a real 180-second window.
    pub fn with_timing(mut self, history: ConvergenceHistory, sample_interval: Duration) -> Self {
        self.history = history;
        self.sample_interval = sample_interval;
        self
    }

    /// A handle observers can poll for `should_stop`/`succeeded`/`done`
    /// while the synchronizer runs on its own thread.
    pub fn state(&self) -> Arc<SyncState> {
        Arc::clone(&self.state)
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Runs the bulk/final-phase loop to completion. Always releases the
    /// device lock (by dropping `self`) and sets `done` on every exit path,
    /// matching the "always thaw" guarantee.
    pub fn do_sync(
        mut self,
        coordinator: &BackupCoordinator,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        info!(device = %self.device, started_at = %self.descriptor.started_at, "synchronizer starting");
        let result = self.run(coordinator, progress);
        let elapsed = chrono::Utc::now().signed_duration_since(self.descriptor.started_at);

        match &result {
            Ok(()) if self.state.succeeded() => {
                info!(device = %self.device, elapsed_ms = elapsed.num_milliseconds(), "synchronizer succeeded");
            }
            Ok(()) => info!(device = %self.device, elapsed_ms = elapsed.num_milliseconds(), "synchronizer stopped without succeeding"),
            Err(e) => error!(device = %self.device, error = %e, "synchronizer failed"),
        }
        self.state.mark_done();
        coordinator.signal_finished();
        result
    }

    fn run(
        &mut self,
        coordinator: &BackupCoordinator,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let mut last_sample = Instant::now();

        loop {
            self.bulk_phase(coordinator, progress, &mut last_sample)?;

            if self.state.should_stop() {
                return Ok(());
            }

            // Final phase: believed caught up. Freeze, flush the tracer,
            // drain anything that landed in the meantime, thaw.
            self.descriptor
                .source
                .freeze()
                .context(FreezeThawSnafu { device: self.device })?;

            if let Err(source) = self.manager.flush_tracer(self.device) {
                let _ = self.descriptor.source.thaw();
                return Err(SyncError::Io {
                    device: self.device,
                    source: DeviceError::Io {
                        device: self.device.to_string(),
                        offset: 0,
                        source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
                    },
                });
            }

            let drain_result = self.drain_under_freeze(progress, &mut last_sample);

            let thaw_result = self.descriptor.source.thaw();
            // Always attempt thaw even if draining failed; surface whichever
            // error is more specific, preferring the drain's.
            if let Err(e) = drain_result {
                let _ = thaw_result;
                return Err(e);
            }
            thaw_result.context(FreezeThawSnafu { device: self.device })?;

            if self.descriptor.store.is_empty() {
                self.state.mark_succeeded();
                return Ok(());
            }

            // New intervals appeared after the flush+drain; go another
            // round unless the job has been cancelled or everyone else is
            // already finished.
            if !coordinator.signal_more_work_to_do() {
                self.state.request_stop();
                return Ok(());
            }
        }
    }

    fn bulk_phase(
        &mut self,
        coordinator: &BackupCoordinator,
        progress: &dyn ProgressSink,
        last_sample: &mut Instant,
    ) -> Result<(), SyncError> {
        loop {
            if coordinator.is_cancelled() {
                self.state.request_stop();
                return Ok(());
            }

            let interval = self.descriptor.store.get_continuous_unsynced();
            if interval.is_empty() {
                return Ok(());
            }

            self.copy_one_block(interval, progress)?;
            self.sample_and_check_convergence(last_sample)?;

            if self.state.should_stop() {
                return Ok(());
            }
        }
    }

    /// Runs the same copy loop as `bulk_phase` but without the convergence
    /// check, since it is expected to terminate quickly under freeze.
    fn drain_under_freeze(
        &mut self,
        progress: &dyn ProgressSink,
        last_sample: &mut Instant,
    ) -> Result<(), SyncError> {
        loop {
            let interval = self.descriptor.store.get_continuous_unsynced();
            if interval.is_empty() {
                return Ok(());
            }
            self.copy_one_block(interval, progress)?;
            self.sample_and_check_convergence(last_sample)?;
        }
    }

    fn sample_and_check_convergence(&mut self, last_sample: &mut Instant) -> Result<(), SyncError> {
        if last_sample.elapsed() < self.sample_interval {
            return Ok(());
        }
        *last_sample = Instant::now();

        let unsynced = self.descriptor.store.unsynced_sector_count();
        self.history.push(unsynced);

        if self.history.is_warmed_up() && self.convergence_policy.is_diverging(&self.history) {
            warn!(device = %self.device, unsynced, "workload did not converge");
            return Err(SyncError::NonConvergent { device: self.device });
        }
        Ok(())
    }

    /// Copy exactly one block (or the interval's remainder, if shorter)
    /// starting at `interval.lower()`, committing the removal to the Store
    /// immediately after: an atomic per-block commit so a crash loses at
    /// most one block of progress. Called once per bulk-phase loop
    /// iteration so cancellation is observed at worst one block-copy
    /// latency later.
    fn copy_one_block(&self, interval: SectorInterval, progress: &dyn ProgressSink) -> Result<(), SyncError> {
        const SECTOR_SIZE: u64 = 512;

        let sectors_per_block = self.descriptor.sectors_per_block.max(1);
        let cursor = interval.lower();
        let sectors_this_block = sectors_per_block.min(interval.upper() - cursor);
        let bytes = (sectors_this_block * SECTOR_SIZE) as usize;
        let offset = cursor * SECTOR_SIZE;
        let device_sectors = self.descriptor.source.size_bytes() / SECTOR_SIZE;

        let mut buf = vec![0u8; bytes];

        let read = self
            .descriptor
            .source
            .read_at(offset, &mut buf[..bytes])
            .map_err(|source| map_device_error(self.device, offset / SECTOR_SIZE, source))?;

        if read < bytes {
            // Legal only if it lines up exactly with the device end.
            ensure!(
                cursor + read as u64 / SECTOR_SIZE == device_sectors,
                UnexpectedEofSnafu {
                    device: self.device,
                    offset: cursor,
                }
            );
        }

        if read > 0 {
            self.descriptor
                .destination
                .write_at(offset, &buf[..read])
                .map_err(|source| map_device_error(self.device, offset / SECTOR_SIZE, source))?;

            let synced_sectors = read as u64 / SECTOR_SIZE;
            let covered = SectorInterval::new(cursor, cursor + synced_sectors);
            self.descriptor.store.remove_interval(covered);

            self.synced_total.fetch_add(synced_sectors, Ordering::Relaxed);
            progress.update_synced(self.synced_total.load(Ordering::Relaxed));
            progress.update_unsynced(self.descriptor.store.unsynced_sector_count());
            debug!(device = %self.device, sector = cursor, sectors = synced_sectors, "block copied");
        } else {
            // Read nothing at the device end; drop the remainder of this
            // interval so the loop doesn't spin on it forever.
            self.descriptor.store.remove_interval(interval);
        }

        Ok(())
    }
}

fn map_device_error(device: DeviceId, offset: u64, source: DeviceError) -> SyncError {
    match source {
        DeviceError::UnexpectedEof { .. } => SyncError::UnexpectedEof { device, offset },
        other => SyncError::Io { device, source: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::local::LocalBlockDevice;
    use crate::device::DeviceId;
    use crate::tracer::fake::FakeTracer;
    use std::io::Write;
    use std::sync::Arc;

    fn make_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f
    }

    #[test]
    fn rejects_construction_with_no_baseline() {
        let src = make_file(&vec![0u8; 4096 * 2]);
        let dst = make_file(&vec![0u8; 4096 * 2]);
        let manager = Arc::new(UnsyncedSectorManager::new(Arc::new(FakeTracer::new())));
        let lock_dir = tempfile::tempdir().unwrap();

        let source: Arc<dyn crate::device::BlockDevice> =
            Arc::new(LocalBlockDevice::open(DeviceId::new(8, 0), src.path()).unwrap());
        let destination: Arc<dyn crate::device::BlockDevice> =
            Arc::new(LocalBlockDevice::open(DeviceId::new(8, 1), dst.path()).unwrap());

        let err = Synchronizer::new(source, destination, manager, lock_dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::NoBaseline { .. }));
    }

    #[test]
    fn copies_only_the_dirty_blocks() {
        let block = 4096usize;
        let mut src_content = vec![0u8; block * 5];
        for (i, byte) in src_content.iter_mut().enumerate() {
            *byte = (i % 256) as u8;
        }
        let src = make_file(&src_content);
        let dst = make_file(&vec![0u8; block * 5]);

        let manager = Arc::new(UnsyncedSectorManager::new(Arc::new(FakeTracer::new())));
        let lock_dir = tempfile::tempdir().unwrap();
        let device = DeviceId::new(8, 2);

        let source: Arc<dyn crate::device::BlockDevice> =
            Arc::new(LocalBlockDevice::open(device, src.path()).unwrap());
        let destination: Arc<dyn crate::device::BlockDevice> =
            Arc::new(LocalBlockDevice::open(DeviceId::new(8, 3), dst.path()).unwrap());

        let store = manager.get_store(device);
        // Blocks 0 and 2 dirty: sectors [0,8) and [16,24) (8 sectors/block).
        store.add_interval(SectorInterval::new(0, 8));
        store.add_interval(SectorInterval::new(16, 24));

        let synchronizer = Synchronizer::new(
            Arc::clone(&source),
            destination.clone(),
            Arc::clone(&manager),
            lock_dir.path(),
        )
        .unwrap();

        let coordinator = BackupCoordinator::new(1);
        synchronizer
            .do_sync(&coordinator, &super::super::stats::NullProgressSink)
            .unwrap();

        let mut dst_block0 = vec![0u8; block];
        destination.read_at(0, &mut dst_block0).unwrap();
        assert_eq!(dst_block0, &src_content[0..block]);

        let mut dst_block1 = vec![0u8; block];
        destination.read_at(block as u64, &mut dst_block1).unwrap();
        assert_eq!(dst_block1, vec![0u8; block]);

        let mut dst_block2 = vec![0u8; block];
        destination.read_at(block as u64 * 2, &mut dst_block2).unwrap();
        assert_eq!(dst_block2, &src_content[block * 2..block * 3]);
    }
}
