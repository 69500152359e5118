//! Session-file protocol: the per-user directory of PID, lock, metadata,
//! and socket files that coordinates the CLI, the daemon, and Chrome.

mod files;
mod lock;
mod paths;
mod process;

use std::fmt;

pub use files::{
    CleanupReport, SessionMeta, atomic_write, atomic_write_json, cleanup_stale, read_meta,
    read_pid_file, remove_session_files, write_meta, write_pid_file,
};
pub use lock::{LockFile, LockState, acquire, acquire_for_pid};
pub use paths::{SESSION_DIR_ENV, SessionPaths};
pub use process::{kill_process, pid_alive};

/// Errors that can occur during session file operations.
#[derive(Debug)]
pub enum SessionError {
    /// Could not determine the home directory.
    NoHomeDir,
    /// I/O error on a session file.
    Io(std::io::Error),
    /// A session file contains invalid data.
    InvalidFormat(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHomeDir => write!(f, "could not determine home directory"),
            Self::Io(e) => write!(f, "session file error: {e}"),
            Self::InvalidFormat(e) => write!(f, "invalid session file: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SessionError> for crate::error::AppError {
    fn from(e: SessionError) -> Self {
        use crate::error::ExitCode;
        Self {
            message: e.to_string(),
            code: ExitCode::UnhandledException,
            custom_json: None,
        }
    }
}
