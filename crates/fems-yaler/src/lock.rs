//! Mutual exclusion for service manager calls
//!
//! The lock is held for exactly one systemctl invocation, never across a whole
//! reconcile sequence.

use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

/// Marker for values that release a lock when dropped
pub trait Held {}

impl<T> Held for T {}

/// Guard returned by [`ControlLock::acquire`]; the lock is released on drop
pub type LockGuard<'a> = Box<dyn Held + 'a>;

/// Lock handle shared by every control operation on the tunnel service
pub trait ControlLock: Send + Sync {
    /// Block until the lock is held
    fn acquire(&self) -> io::Result<LockGuard<'_>>;
}

/// In-process lock
#[derive(Debug, Default)]
pub struct ProcessLock {
    inner: Mutex<()>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ControlLock for ProcessLock {
    fn acquire(&self) -> io::Result<LockGuard<'_>> {
        // A panic while holding the lock leaves nothing to repair.
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Box::new(guard))
    }
}

/// Advisory file lock shared between overlapping processes
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

/// Keeps the lock file open and locked until dropped
struct FileLockGuard {
    file: File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release service control lock: {}", e);
        }
    }
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ControlLock for FileLock {
    fn acquire(&self) -> io::Result<LockGuard<'_>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        Ok(Box::new(FileLockGuard { file }))
    }
}
