//! `bdg peek` — preview the most recent captured telemetry.

use bdg::error::AppError;
use bdg::ipc::{IpcRequest, new_session_id};

use crate::cli::{GlobalOpts, PeekArgs};
use crate::support::{print_output, request_daemon, resolve_paths};

pub async fn execute_peek(global: &GlobalOpts, args: &PeekArgs) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;

    let request = IpcRequest::PeekRequest {
        session_id: new_session_id(),
        last_n: Some(args.last),
        offset: Some(args.offset),
    };
    let data = request_daemon(&paths, &request).await?;

    if global.output.plain {
        print_plain(&data);
        return Ok(());
    }
    print_output(&data, &global.output)
}

fn print_plain(data: &serde_json::Value) {
    if let Some(items) = data["network"]["items"].as_array() {
        for item in items {
            let status = item["status"]
                .as_u64()
                .map_or_else(|| "---".to_string(), |s| s.to_string());
            println!(
                "{} {} {}",
                item["method"].as_str().unwrap_or("GET"),
                item["url"].as_str().unwrap_or(""),
                status,
            );
        }
    }
    if let Some(items) = data["console"]["items"].as_array() {
        for item in items {
            let prefix = match item["type"].as_str().unwrap_or("log") {
                "error" | "assert" => "ERR",
                "warning" | "warn" => "WRN",
                "info" => "INF",
                "debug" => "DBG",
                _ => "LOG",
            };
            println!("[{prefix}] {}", item["text"].as_str().unwrap_or(""));
        }
    }
}
