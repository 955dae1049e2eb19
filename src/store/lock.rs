//! Exclusive advisory file locks shared across processes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// An exclusive lock on a zero-byte lock file, held until dropped.
///
/// Every cooperating process opens the same lock file and blocks until it
/// holds the lock. Each `acquire` opens its own handle, so two handles in
/// the same process exclude each other as well.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is held, creating the file if needed.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock too.
        let _ = self.file.unlock();
    }
}

/// Run `f` while holding the exclusive lock on `lock_path`.
pub fn with_exclusive_lock<T, E>(lock_path: &Path, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: From<io::Error>,
{
    let _lock = FileLock::acquire(lock_path)?;
    f()
}
