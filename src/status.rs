//! `bdg status` — session status, degrading to on-disk metadata when the
//! daemon socket is unreachable.

use serde_json::json;

use bdg::error::{AppError, ExitCode};
use bdg::ipc::{IpcRequest, new_session_id};
use bdg::session;

use crate::cli::GlobalOpts;
use crate::support::{print_output, request_daemon, resolve_paths};

pub async fn execute_status(global: &GlobalOpts) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;

    let request = IpcRequest::StatusRequest {
        session_id: new_session_id(),
    };
    match request_daemon(&paths, &request).await {
        Ok(data) => {
            let value = json!({"running": true, "reachable": true, "session": data});
            if global.output.plain {
                print_plain(&value);
                return Ok(());
            }
            print_output(&value, &global.output)
        }
        Err(e) if e.code == ExitCode::ResourceNotFound => {
            // Daemon unreachable: fall back to the metadata file.
            let Some(meta) = session::read_meta(&paths)? else {
                return Err(AppError::no_session());
            };
            let alive = session::pid_alive(meta.bdg_pid);
            let value = json!({
                "running": alive,
                "reachable": false,
                "meta": meta,
            });
            if global.output.plain {
                print_plain(&value);
                return Ok(());
            }
            print_output(&value, &global.output)
        }
        Err(e) => Err(e),
    }
}

fn print_plain(value: &serde_json::Value) {
    let running = value["running"].as_bool().unwrap_or(false);
    let reachable = value["reachable"].as_bool().unwrap_or(false);
    println!("running:   {running}");
    println!("reachable: {reachable}");
    if let Some(session) = value.get("session") {
        if let Some(target) = session["target"].as_object() {
            println!(
                "target:    {} ({})",
                target.get("url").and_then(|u| u.as_str()).unwrap_or("-"),
                target.get("title").and_then(|t| t.as_str()).unwrap_or("-"),
            );
        }
        println!(
            "elapsed:   {}ms",
            session["elapsedMs"].as_u64().unwrap_or(0)
        );
        println!(
            "captured:  {} network, {} console",
            session["network"]["count"].as_u64().unwrap_or(0),
            session["console"]["count"].as_u64().unwrap_or(0),
        );
    }
    if let Some(meta) = value.get("meta") {
        println!(
            "pid:       {}",
            meta["bdgPid"].as_u64().unwrap_or(0)
        );
        println!(
            "started:   {}",
            meta["startTime"].as_str().unwrap_or("-")
        );
    }
}
