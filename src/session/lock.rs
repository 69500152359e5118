//! Filesystem locks with at-most-one-holder semantics.
//!
//! A lock is a file created with exclusive-create semantics containing the
//! owner's PID. Crash recovery relies on PID liveness rather than advisory
//! fcntl locks: a lock file whose stored PID is dead is stale and may be
//! replaced.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::SessionError;
use super::process::pid_alive;

/// An acquired lock. Release is explicit; the daemon removes its locks at
/// a fixed point in the shutdown order, and a crashed holder is cleaned up
/// by the staleness check on the next acquire.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug)]
pub enum LockState {
    /// The lock was acquired by this process.
    Acquired(LockFile),
    /// A live process holds the lock.
    Held {
        /// PID of the current holder.
        pid: u32,
    },
}

impl LockFile {
    /// Remove the lock file. Missing files are not an error (release is
    /// idempotent with cleanup paths that remove the whole directory).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Io` on I/O errors other than "not found".
    pub fn release(self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Acquire the lock at `path` for the current process.
///
/// # Errors
///
/// Returns `SessionError::Io` on unexpected filesystem failures.
pub fn acquire(path: &Path) -> Result<LockState, SessionError> {
    acquire_for_pid(path, std::process::id())
}

/// Testable core of [`acquire`]: the owner PID is a parameter.
///
/// 1. Attempt exclusive create; on success the lock is acquired.
/// 2. On conflict, read the stored PID. A live holder wins; a dead holder's
///    file is removed and the create is retried once.
///
/// # Errors
///
/// Returns `SessionError::Io` on unexpected filesystem failures.
pub fn acquire_for_pid(path: &Path, pid: u32) -> Result<LockState, SessionError> {
    for attempt in 0..2 {
        match try_create(path, pid) {
            Ok(()) => return Ok(LockState::Acquired(LockFile { path: path.into() })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_holder(path);
                match holder {
                    Some(holder_pid) if pid_alive(holder_pid) => {
                        return Ok(LockState::Held { pid: holder_pid });
                    }
                    _ => {
                        // Stale or unreadable lock: remove and retry once.
                        if attempt == 1 {
                            return Ok(LockState::Held {
                                pid: holder.unwrap_or(0),
                            });
                        }
                        match std::fs::remove_file(path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(SessionError::Io(e)),
                        }
                    }
                }
            }
            Err(e) => return Err(SessionError::Io(e)),
        }
    }
    unreachable!("lock acquisition loop always returns within two attempts")
}

/// Exclusive-create the lock file containing the owner PID.
fn try_create(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(pid.to_string().as_bytes())?;
    file.sync_all()
}

/// Read the holder PID from an existing lock file.
fn read_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
