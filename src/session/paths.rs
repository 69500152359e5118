use std::path::{Path, PathBuf};

use super::SessionError;

/// Environment variable overriding the session directory.
pub const SESSION_DIR_ENV: &str = "BDG_SESSION_DIR";

/// Well-known file layout inside the per-user session directory.
///
/// Ownership: the daemon owns `daemon.*`; the session side owns
/// `session.*` and `chrome.pid`; `session.json` belongs to the user once
/// the session has ended.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    /// Resolve the session directory: `$BDG_SESSION_DIR` if set, else
    /// `~/.bdg`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoHomeDir` when neither the override nor a
    /// home directory is available.
    pub fn resolve() -> Result<Self, SessionError> {
        if let Ok(dir) = std::env::var(SESSION_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(Self::at(PathBuf::from(dir)));
            }
        }
        let home = dirs::home_dir().ok_or(SessionError::NoHomeDir)?;
        Ok(Self::at(home.join(".bdg")))
    }

    /// Use an explicit directory (tests and `cleanup --dir`).
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the session directory with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Io` on filesystem failure.
    pub fn ensure_root(&self) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Worker PID file.
    #[must_use]
    pub fn session_pid(&self) -> PathBuf {
        self.root.join("session.pid")
    }

    /// Session lock file (owner PID as text).
    #[must_use]
    pub fn session_lock(&self) -> PathBuf {
        self.root.join("session.lock")
    }

    /// Session metadata JSON, written once collectors are running.
    #[must_use]
    pub fn session_meta(&self) -> PathBuf {
        self.root.join("session.meta.json")
    }

    /// Daemon PID file.
    #[must_use]
    pub fn daemon_pid(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    /// IPC socket path.
    #[must_use]
    pub fn daemon_sock(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }

    /// Daemon lock file (owner PID as text).
    #[must_use]
    pub fn daemon_lock(&self) -> PathBuf {
        self.root.join("daemon.lock")
    }

    /// Chrome PID file. Preserved across sessions.
    #[must_use]
    pub fn chrome_pid(&self) -> PathBuf {
        self.root.join("chrome.pid")
    }

    /// Final telemetry output. Preserved after the session ends.
    #[must_use]
    pub fn session_output(&self) -> PathBuf {
        self.root.join("session.json")
    }

    /// Persistent Chrome user data directory.
    #[must_use]
    pub fn chrome_profile(&self) -> PathBuf {
        self.root.join("chrome-profile")
    }

    /// Captured stdout/stderr of the detached daemon.
    #[must_use]
    pub fn daemon_log(&self) -> PathBuf {
        self.root.join("daemon.log")
    }
}
