//! On-disk session state: PID files, session metadata, and stale-session
//! cleanup.
//!
//! Every metadata write goes through a temp-file-plus-rename so readers
//! never observe a torn file; the rename is the commit point.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::paths::SessionPaths;
use super::process::{kill_process, pid_alive};
use super::{LockState, SessionError, lock};

/// Session metadata persisted once collectors are running.
///
/// Read by `bdg status` when the daemon socket is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// PID of the bdg process that owns the session.
    pub bdg_pid: u32,
    /// PID of the Chrome process, when bdg launched it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_pid: Option<u32>,
    /// Session start time, ISO 8601.
    pub start_time: String,
    /// Chrome remote-debugging port.
    pub port: u16,
    /// CDP target id of the session tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// WebSocket debugger URL of the session tab.
    #[serde(
        rename = "webSocketDebuggerUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub ws_debugger_url: Option<String>,
    /// Telemetry kinds active in this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_telemetry: Option<Vec<String>>,
}

/// Write a string to `path` atomically (temp file + rename), with
/// owner-only permissions on Unix.
///
/// # Errors
///
/// Returns `SessionError::Io` on filesystem failure.
pub fn atomic_write(path: &Path, contents: &str) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// # Errors
///
/// Returns `SessionError::InvalidFormat` if serialization fails, or
/// `SessionError::Io` on filesystem failure.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SessionError::InvalidFormat(e.to_string()))?;
    atomic_write(path, &json)
}

/// Write a PID file (text, atomic).
///
/// # Errors
///
/// Returns `SessionError::Io` on filesystem failure.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), SessionError> {
    atomic_write(path, &pid.to_string())
}

/// Read a PID file. Returns `None` when the file is missing or does not
/// parse as a PID.
#[must_use]
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Write session metadata atomically.
///
/// # Errors
///
/// Returns `SessionError` on serialization or filesystem failure.
pub fn write_meta(paths: &SessionPaths, meta: &SessionMeta) -> Result<(), SessionError> {
    atomic_write_json(&paths.session_meta(), meta)
}

/// Read session metadata. Returns `Ok(None)` when no metadata file exists.
///
/// # Errors
///
/// Returns `SessionError::InvalidFormat` on malformed JSON, or
/// `SessionError::Io` on other I/O errors.
pub fn read_meta(paths: &SessionPaths) -> Result<Option<SessionMeta>, SessionError> {
    match std::fs::read_to_string(paths.session_meta()) {
        Ok(contents) => {
            let meta: SessionMeta = serde_json::from_str(&contents)
                .map_err(|e| SessionError::InvalidFormat(e.to_string()))?;
            Ok(Some(meta))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SessionError::Io(e)),
    }
}

/// Remove a file, treating "not found" as success.
fn remove_quiet(path: &Path, removed: &mut Vec<String>) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            if let Some(name) = path.file_name() {
                removed.push(name.to_string_lossy().into_owned());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove"),
    }
}

/// Remove the session's coordination files.
///
/// `session.json`, `chrome.pid`, and the Chrome profile directory are
/// never touched. Returns the file names actually removed.
pub fn remove_session_files(paths: &SessionPaths) -> Vec<String> {
    let mut removed = Vec::new();
    remove_quiet(&paths.session_pid(), &mut removed);
    remove_quiet(&paths.session_lock(), &mut removed);
    remove_quiet(&paths.session_meta(), &mut removed);
    remove_quiet(&paths.daemon_pid(), &mut removed);
    remove_quiet(&paths.daemon_sock(), &mut removed);
    remove_quiet(&paths.daemon_lock(), &mut removed);
    removed
}

/// Outcome of a [`cleanup_stale`] pass.
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    /// File names removed from the session directory.
    pub removed: Vec<String>,
    /// Chrome PID that was killed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killed_chrome: Option<u32>,
    /// Orphaned worker PID that was killed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killed_worker: Option<u32>,
    /// True when a live session was found and nothing was done.
    pub session_active: bool,
}

/// Detect and clean up a stale session.
///
/// Runs under the session lock. When neither the worker nor the daemon PID
/// points at a live process, the coordination files are removed and any
/// cached Chrome PID is killed. A worker that outlives the daemon is an
/// orphan and is force-killed. Repeated calls after a successful cleanup
/// are no-ops.
///
/// # Errors
///
/// Returns `SessionError::Io` on unexpected filesystem failures.
pub fn cleanup_stale(paths: &SessionPaths) -> Result<CleanupReport, SessionError> {
    let mut report = CleanupReport::default();

    let worker_pid = read_pid_file(&paths.session_pid());
    let daemon_pid = read_pid_file(&paths.daemon_pid());
    let worker_alive = worker_pid.is_some_and(pid_alive);
    let daemon_alive = daemon_pid.is_some_and(pid_alive);

    if daemon_alive {
        report.session_active = true;
        return Ok(report);
    }

    // Hold the session lock while mutating, unless a live process owns it.
    let guard = match lock::acquire(&paths.session_lock())? {
        LockState::Acquired(lock) => Some(lock),
        LockState::Held { pid } if pid != std::process::id() => {
            report.session_active = true;
            return Ok(report);
        }
        LockState::Held { .. } => None,
    };

    if worker_alive {
        // The daemon is gone but its worker survived: an orphan.
        if let Some(pid) = worker_pid {
            tracing::warn!(pid, "killing orphaned session worker");
            kill_process(pid);
            report.killed_worker = Some(pid);
        }
    }

    if let Some(chrome) = read_pid_file(&paths.chrome_pid()) {
        if pid_alive(chrome) {
            tracing::info!(pid = chrome, "killing cached Chrome process");
            kill_process(chrome);
            report.killed_chrome = Some(chrome);
        }
    }

    report.removed = remove_session_files(paths);
    // The lock file itself was removed above; dropping the guard must not
    // recreate or double-remove it.
    if let Some(lock) = guard {
        let _ = lock.release();
    }
    Ok(report)
}
