//! Shared plumbing for the CLI commands: session-path resolution, one
//! daemon round-trip, and JSON output.

use serde::Serialize;

use bdg::error::{AppError, ExitCode};
use bdg::ipc::{self, IpcRequest};
use bdg::session::SessionPaths;

use crate::cli::{GlobalOpts, OutputFormat};

/// Resolve the session directory from `--session-dir` / `BDG_SESSION_DIR`
/// / `~/.bdg`.
pub fn resolve_paths(global: &GlobalOpts) -> Result<SessionPaths, AppError> {
    match &global.session_dir {
        Some(dir) => Ok(SessionPaths::at(dir.clone())),
        None => SessionPaths::resolve().map_err(AppError::from),
    }
}

/// Perform one request against the daemon and unwrap the response
/// payload, mapping daemon errors onto stable exit codes.
pub async fn request_daemon(
    paths: &SessionPaths,
    request: &IpcRequest,
) -> Result<serde_json::Value, AppError> {
    let response = ipc::client::request(&paths.daemon_sock(), request)
        .await
        .map_err(AppError::from)?;
    response.into_result()
}

/// Print a value honoring the `--json/--pretty` flags (`--plain` is
/// rendered by each command before calling this).
pub fn print_output(value: &impl Serialize, output: &OutputFormat) -> Result<(), AppError> {
    let json = if output.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    let json = json.map_err(|e| AppError {
        message: format!("serialization error: {e}"),
        code: ExitCode::UnhandledException,
        custom_json: None,
    })?;
    println!("{json}");
    Ok(())
}
