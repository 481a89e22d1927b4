//! `BackupService`: the in-process façade an external IPC
//! layer calls into, implementing `submit_backup` / `job_handle.wait` /
//! `job_handle.cancel`. Grounded in mayastor's service-struct shape
//! (`grpc/v1/snapshot.rs`'s name/new/handle split, retrieved by name only)
//! with the tonic/gRPC parts stripped, since the wire layer itself is out
//! of scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use snafu::{ensure, ResultExt, Snafu};
use tracing::info;

use crate::coordinator::BackupCoordinator;
use crate::device::{BlockDevice, DeviceError, DeviceId};
use crate::manager::UnsyncedSectorManager;
use crate::sync::{NullProgressSink, SyncError, SyncState, Synchronizer};
use crate::tracer::TracerError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("{device}: no baseline tracer exists for an incremental backup"))]
    UntracedIncremental { device: DeviceId },

    #[snafu(display("{device}: failed to start tracer: {source}"))]
    TracerStart { device: DeviceId, source: TracerError },

    #[snafu(display("{device}: failed to scan in-use sectors for a full backup: {source}"))]
    InUseScan { device: DeviceId, source: DeviceError },

    #[snafu(display("{device}: synchronizer construction failed: {source}"))]
    Rejected { device: DeviceId, source: SyncError },

    #[snafu(display("no such job: {job_id}"))]
    UnknownJob { job_id: u64 },
}

/// One requested source/destination pair.
/// Device discovery and the destination transport are resolved externally;
/// the service only sees already-opened capability handles.
pub struct BackupVector {
    pub source: Arc<dyn BlockDevice>,
    pub destination: Arc<dyn BlockDevice>,
}

/// The result of `job_handle.wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub finished: bool,
    pub succeeded: bool,
}

enum JobEntry {
    Running {
        coordinator: Arc<BackupCoordinator>,
        threads: Vec<JoinHandle<Result<(), SyncError>>>,
        states: Vec<Arc<SyncState>>,
    },
    Finished(JobOutcome),
}

/// The per-process job table plus the long-lived `UnsyncedSectorManager`
/// every submitted job shares.
pub struct BackupService {
    manager: Arc<UnsyncedSectorManager>,
    lock_dir: std::path::PathBuf,
    jobs: Mutex<HashMap<u64, JobEntry>>,
    next_job_id: AtomicU64,
}

impl BackupService {
    pub fn new(manager: Arc<UnsyncedSectorManager>, lock_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            manager,
            lock_dir: lock_dir.into(),
            jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Applies the `is_full` seeding rule, constructs one `Synchronizer`
    /// per vector (failing fast on any precondition violation), wraps them
    /// in one `Coordinator`, and spawns one thread per synchronizer.
    /// Returns the new job's id.
    pub fn submit_backup(
        &self,
        vectors: Vec<BackupVector>,
        is_full: bool,
    ) -> Result<u64, ServiceError> {
        for vector in &vectors {
            self.prepare_source(vector, is_full)?;
        }

        let coordinator = Arc::new(BackupCoordinator::new(vectors.len()));
        let mut threads = Vec::with_capacity(vectors.len());
        let mut states = Vec::with_capacity(vectors.len());

        for vector in vectors {
            let device = vector.source.id();
            let synchronizer = Synchronizer::new(
                vector.source,
                vector.destination,
                Arc::clone(&self.manager),
                &self.lock_dir,
            )
            .context(RejectedSnafu { device })?;
            states.push(synchronizer.state());

            let coordinator = Arc::clone(&coordinator);
            threads.push(std::thread::spawn(move || {
                synchronizer.do_sync(&coordinator, &NullProgressSink)
            }));
        }

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        info!(job_id, devices = threads.len(), is_full, "backup job submitted");
        self.jobs.lock().insert(
            job_id,
            JobEntry::Running {
                coordinator,
                threads,
                states,
            },
        );
        Ok(job_id)
    }

    fn prepare_source(&self, vector: &BackupVector, is_full: bool) -> Result<(), ServiceError> {
        let device = vector.source.id();
        let already_tracing = self.manager.is_tracing(device);

        ensure!(
            is_full || already_tracing,
            UntracedIncrementalSnafu { device }
        );

        if is_full {
            if !already_tracing {
                self.manager
                    .start_tracer(device)
                    .context(TracerStartSnafu { device })?;
            }
            let store = self.manager.get_store(device);
            store.clear_intervals();
            for interval in vector.source.in_use_sectors().context(InUseScanSnafu { device })? {
                store.add_interval(interval);
            }
        }
        Ok(())
    }

    /// Blocks up to `timeout` for the job to finish. Once finished, joins
    /// every synchronizer thread exactly once and caches the rolled-up
    /// outcome so a later call observes the same result.
    pub fn wait(&self, job_id: u64, timeout: Duration) -> Result<JobOutcome, ServiceError> {
        let coordinator = {
            let jobs = self.jobs.lock();
            match jobs.get(&job_id) {
                Some(JobEntry::Finished(outcome)) => return Ok(*outcome),
                Some(JobEntry::Running { coordinator, .. }) => Arc::clone(coordinator),
                None => return UnknownJobSnafu { job_id }.fail(),
            }
        };

        if !coordinator.wait_until_finished(timeout) {
            return Ok(JobOutcome {
                finished: false,
                succeeded: false,
            });
        }

        let mut jobs = self.jobs.lock();
        let entry = jobs.remove(&job_id);
        let outcome = match entry {
            Some(JobEntry::Running { threads, states, .. }) => {
                // Join every thread so a panic is observed (and treated as a
                // failure) even though the roll-up itself is driven by each
                // synchronizer's `succeeded` flag, per §4.5.
                let any_panicked = threads.into_iter().any(|t| t.join().is_err());
                let succeeded = !any_panicked && states.iter().all(|s| s.succeeded());
                JobOutcome {
                    finished: true,
                    succeeded,
                }
            }
            Some(JobEntry::Finished(outcome)) => outcome,
            None => return UnknownJobSnafu { job_id }.fail(),
        };
        jobs.insert(job_id, JobEntry::Finished(outcome));
        info!(job_id, succeeded = outcome.succeeded, "backup job finished");
        Ok(outcome)
    }

    /// Fans out cancellation to every synchronizer in the job. A no-op if
    /// the job has already finished.
    pub fn cancel(&self, job_id: u64) -> Result<(), ServiceError> {
        let jobs = self.jobs.lock();
        match jobs.get(&job_id) {
            Some(JobEntry::Running { coordinator, .. }) => {
                coordinator.cancel();
                Ok(())
            }
            Some(JobEntry::Finished(_)) => Ok(()),
            None => UnknownJobSnafu { job_id }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::local::LocalBlockDevice;
    use crate::interval::SectorInterval;
    use crate::tracer::fake::FakeTracer;
    use std::io::Write;

    fn make_file(len: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
        f
    }

    #[test]
    fn incremental_backup_without_a_tracer_is_rejected() {
        let manager = Arc::new(UnsyncedSectorManager::new(Arc::new(FakeTracer::new())));
        let lock_dir = tempfile::tempdir().unwrap();
        let service = BackupService::new(manager, lock_dir.path());

        let src = make_file(4096 * 2);
        let dst = make_file(4096 * 2);
        let vector = BackupVector {
            source: Arc::new(LocalBlockDevice::open(DeviceId::new(9, 0), src.path()).unwrap()),
            destination: Arc::new(LocalBlockDevice::open(DeviceId::new(9, 1), dst.path()).unwrap()),
        };

        let err = service.submit_backup(vec![vector], false).unwrap_err();
        assert!(matches!(err, ServiceError::UntracedIncremental { .. }));
    }

    #[test]
    fn incremental_backup_with_pending_dirt_runs_to_completion() {
        let manager = Arc::new(UnsyncedSectorManager::new(Arc::new(FakeTracer::new())));
        let lock_dir = tempfile::tempdir().unwrap();
        let service = BackupService::new(Arc::clone(&manager), lock_dir.path());

        let src = make_file(4096 * 2);
        let dst = make_file(4096 * 2);
        let device = DeviceId::new(9, 2);
        manager.start_tracer(device).unwrap();
        manager.get_store(device).add_interval(SectorInterval::new(0, 8));

        let vector = BackupVector {
            source: Arc::new(LocalBlockDevice::open(device, src.path()).unwrap()),
            destination: Arc::new(LocalBlockDevice::open(DeviceId::new(9, 3), dst.path()).unwrap()),
        };

        let job_id = service.submit_backup(vec![vector], false).unwrap();
        let outcome = service.wait(job_id, Duration::from_secs(5)).unwrap();
        assert!(outcome.finished);
        assert!(outcome.succeeded);

        // Second wait observes the same cached outcome without re-joining.
        let outcome2 = service.wait(job_id, Duration::from_millis(1)).unwrap();
        assert_eq!(outcome, outcome2);
    }

    #[test]
    fn wait_on_unknown_job_is_an_error() {
        let manager = Arc::new(UnsyncedSectorManager::new(Arc::new(FakeTracer::new())));
        let lock_dir = tempfile::tempdir().unwrap();
        let service = BackupService::new(manager, lock_dir.path());

        let err = service.wait(999, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, ServiceError::UnknownJob { .. }));
    }
}
