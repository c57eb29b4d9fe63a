//! Cross-process advisory locking.
//!
//! Uses `flock(2)` (through `fs2`) on a sidecar lock file. Every acquisition is
//! bounded: a lock that cannot be taken within its timeout yields
//! [`ChronoError::LockTimeout`] so callers can skip the item and move on.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::{ChronoError, Result};

/// Timeout for the per-file lock taken around each rename.
pub const RENAME_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for the lock guarding index load/save.
pub const INDEX_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between non-blocking lock attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// RAII guard that releases the flock when dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    remove_on_release: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %err, "failed to release lock");
        }
        if self.remove_on_release {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Sidecar path used to lock `target`: the file name with `.lock` appended.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Take an exclusive lock on `lock_path`, creating the file if needed. The
/// lock file is left in place after release.
pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<LockGuard> {
    acquire_inner(lock_path, timeout, false)
}

/// Like [`acquire`], but the lock file is deleted when the guard drops. Used
/// for short-lived per-document locks so they do not accumulate.
pub fn acquire_ephemeral(
    lock_path: &Path,
    timeout: Duration,
) -> Result<LockGuard> {
    acquire_inner(lock_path, timeout, true)
}

fn acquire_inner(
    lock_path: &Path,
    timeout: Duration,
    remove_on_release: bool,
) -> Result<LockGuard> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|err| ChronoError::io(lock_path, err))?;

    let start = Instant::now();
    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                return Ok(LockGuard {
                    file,
                    path: lock_path.to_path_buf(),
                    remove_on_release,
                });
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_contended(&err) => {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(ChronoError::LockTimeout {
                        path: lock_path.to_path_buf(),
                        waited,
                    });
                }
                thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - waited));
            }
            Err(err) => return Err(ChronoError::io(lock_path, err)),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
