// src/store/lock.rs

//! Exclusive ownership of a state directory.
//!
//! Only the hub holding `<state_dir>/hub.lock` may start steps or rewrite
//! status records. The lock is an OS file lock, so it is released when the
//! holder exits, crashed or not.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Lock file name, relative to the state dir.
pub const LOCK_FILE: &str = "hub.lock";

#[derive(Debug)]
pub struct StateDirLock {
    path: PathBuf,
    // Held only for its lock; closing the file releases it.
    _file: File,
}

impl StateDirLock {
    /// Take the lock without waiting.
    ///
    /// `Ok(None)` means another hub holds it, in this process or another.
    pub fn try_acquire(state_dir: &Path) -> io::Result<Option<Self>> {
        let path = state_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Error(err)) => return Err(err),
        }

        // Informational only: who holds the state dir.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Some(Self { path, _file: file }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
