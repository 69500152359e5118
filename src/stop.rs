//! `bdg stop` — end the session and collect the final output.

use std::time::Duration;

use serde::Serialize;

use bdg::error::AppError;
use bdg::ipc::{IpcRequest, new_session_id};
use bdg::session;

use crate::cli::{GlobalOpts, StopArgs};
use crate::support::{print_output, request_daemon, resolve_paths};

/// How long to wait for the daemon to finish its teardown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct StopInfo {
    stopped: bool,
    output: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    shutdown_pending: bool,
}

pub async fn execute_stop(global: &GlobalOpts, args: &StopArgs) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;

    let request = IpcRequest::StopSessionRequest {
        session_id: new_session_id(),
        kill_chrome: args.kill_chrome,
    };
    request_daemon(&paths, &request).await?;

    // The daemon acks first, then tears down: snapshot, session.json,
    // file removal. Wait for the socket to disappear.
    let deadline = tokio::time::Instant::now() + SHUTDOWN_WAIT;
    let mut clean_exit = false;
    loop {
        let daemon_gone = session::read_pid_file(&paths.daemon_pid())
            .is_none_or(|pid| !session::pid_alive(pid));
        if daemon_gone && !paths.daemon_sock().exists() {
            clean_exit = true;
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let info = StopInfo {
        stopped: true,
        output: paths.session_output().display().to_string(),
        shutdown_pending: !clean_exit,
    };
    if global.output.plain {
        println!("session stopped; output at {}", info.output);
        return Ok(());
    }
    print_output(&info, &global.output)
}
