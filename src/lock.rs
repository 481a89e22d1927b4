//! Per-device advisory lock files, grounded directly in
//! the reference implementation's `Flock` (`original_source/client/test/flock_test.cc`
//! exercises the behavior this mirrors: construct-locks, drop-releases,
//! double-lock fails, and the pid is written into the lock file for an
//! operator to inspect).

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use nix::unistd::Pid;
use snafu::Snafu;

use crate::device::DeviceId;

#[derive(Debug, Snafu)]
pub enum LockError {
    #[snafu(display("{device}: failed to open lock file {path}: {source}"))]
    Open {
        device: DeviceId,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("{device}: device is already locked by another synchronizer"))]
    Busy { device: DeviceId },
}

/// Holds an exclusive, non-blocking `flock` on a per-device lock file for
/// as long as the guard lives. The lock is released (and, being advisory,
/// only meaningful to other processes using the same mechanism) when the
/// guard is dropped, regardless of which exit path a synchronizer takes —
/// mirroring `Flock`'s destructor-releases behavior.
pub struct DeviceLock {
    device: DeviceId,
    file: std::fs::File,
}

impl DeviceLock {
    /// Acquire the lock for `device` under `lock_dir`, failing immediately
    /// (rather than blocking) if another synchronizer already holds it.
    pub fn acquire(lock_dir: impl AsRef<Path>, device: DeviceId) -> Result<Self, LockError> {
        let path: PathBuf = lock_dir.as_ref().join(format!("{}:{}.lock", device.major, device.minor));
        let path_str = path.display().to_string();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                device,
                path: path_str.clone(),
                source,
            })?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(nix::Error::EWOULDBLOCK) => return Err(LockError::Busy { device }),
            Err(e) => {
                return Err(LockError::Open {
                    device,
                    path: path_str,
                    source: std::io::Error::from(e),
                })
            }
        }

        let mut lock = Self { device, file };
        lock.write_pid();
        Ok(lock)
    }

    fn write_pid(&mut self) {
        // Informational only: the core never reads this back, it exists
        // so an operator can diagnose a stuck lock.
        let pid = Pid::this();
        let _ = self.file.set_len(0);
        let _ = write!(self.file, "{pid}");
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_succeeds_on_a_fresh_lock_dir() {
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceId::new(7, 0);
        let _lock = DeviceLock::acquire(dir.path(), device).unwrap();
    }

    #[test]
    fn acquire_fails_when_already_locked() {
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceId::new(7, 0);
        let _held = DeviceLock::acquire(dir.path(), device).unwrap();

        let err = DeviceLock::acquire(dir.path(), device).unwrap_err();
        assert!(matches!(err, LockError::Busy { .. }));
    }

    #[test]
    fn releasing_the_guard_allows_reacquisition() {
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceId::new(7, 0);
        {
            let _lock = DeviceLock::acquire(dir.path(), device).unwrap();
        }
        let _lock2 = DeviceLock::acquire(dir.path(), device).unwrap();
    }

    #[test]
    fn pid_is_written_to_the_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceId::new(7, 0);
        let lock = DeviceLock::acquire(dir.path(), device).unwrap();
        let path = dir.path().join(format!("{}:{}.lock", device.major, device.minor));
        let contents = std::fs::read_to_string(path).unwrap();
        let file_pid: i32 = contents.trim().parse().unwrap();
        assert_eq!(file_pid, std::process::id() as i32);
        drop(lock);
    }
}
