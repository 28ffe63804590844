//! # Cross-Process Lock and Change Signalling
//!
//! Two sibling files coordinate every process sharing a database:
//!
//! - `<db>.lock`: an advisory exclusive lock, acquired around every
//!   database operation. The lock is named by the database path, so all
//!   processes opening the same file contend on the same lock.
//! - `<db>.changed`: the change ping. After a successful mutation the
//!   writer truncates it to zero length; the inode mtime change is what
//!   file-system watchers in other processes react to. The stored
//!   transaction id remains the authoritative staleness check; a ping
//!   with an unchanged id is spurious and ignored.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;
use tracing::warn;

use crate::error::{Error, Result};

/// Suffix of the change-ping file.
pub const CHANGED_SUFFIX: &str = ".changed";

/// Suffix of the lock file.
pub const LOCK_SUFFIX: &str = ".lock";

fn sibling(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

// =============================================================================
// Process lock
// =============================================================================

/// The named cross-process mutex guarding a database file.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
    db_path: PathBuf,
}

impl ProcessLock {
    /// Opens (creating if needed) the lock file next to the database.
    pub fn new(db_path: &Path) -> Result<Self> {
        let lock_path = sibling(db_path, LOCK_SUFFIX);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|err| Error::Lock {
                path: db_path.display().to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            file,
            db_path: db_path.to_path_buf(),
        })
    }

    /// Blocks until the exclusive lock is held. The guard releases on
    /// drop.
    pub fn acquire(&self) -> Result<LockGuard<'_>> {
        self.file.lock_exclusive().map_err(|err| Error::Lock {
            path: self.db_path.display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(LockGuard { lock: self })
    }
}

/// Holds the cross-process lock for the duration of a critical section.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a ProcessLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // A failed release must not deadlock the caller; log and move on.
        if let Err(err) = self.lock.file.unlock() {
            warn!(path = %self.lock.db_path.display(), %err, "cannot release database lock");
        }
    }
}

// =============================================================================
// Change ping
// =============================================================================

/// The `<db>.changed` wake-up file.
#[derive(Debug, Clone)]
pub struct ChangePing {
    path: PathBuf,
}

impl ChangePing {
    /// Creates the ping file if missing and returns a handle to it.
    pub fn new(db_path: &Path) -> Result<Self> {
        let path = sibling(db_path, CHANGED_SUFFIX);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| Error::Lock {
                path: db_path.display().to_string(),
                reason: format!("cannot open change file: {err}"),
            })?;
        Ok(Self { path })
    }

    /// The ping file path (what a watcher should observe).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates the file to zero length, waking peer watchers.
    pub fn signal(&self) {
        if let Err(err) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            warn!(path = %self.path.display(), %err, "cannot touch change file");
        }
    }

    /// The current mtime of the ping file, when readable.
    pub fn modified_time(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
    }
}
