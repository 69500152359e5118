//! `bdg dom` — DOM inspection helpers over the daemon.

use base64::Engine;
use serde::Serialize;

use bdg::error::{AppError, ExitCode};
use bdg::ipc::{IpcRequest, new_session_id};

use crate::cli::{DomArgs, DomCommand, DomScreenshotArgs, GlobalOpts};
use crate::support::{print_output, request_daemon, resolve_paths};

#[derive(Serialize)]
struct SavedScreenshot {
    saved: String,
    format: String,
    bytes: usize,
}

pub async fn execute_dom(global: &GlobalOpts, args: &DomArgs) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;

    let request = match &args.command {
        DomCommand::Query(query) => IpcRequest::DomQueryRequest {
            session_id: new_session_id(),
            selector: query.selector.clone(),
            limit: Some(query.limit),
        },
        DomCommand::Get(get) => IpcRequest::DomGetRequest {
            session_id: new_session_id(),
            target: get.target.clone(),
        },
        DomCommand::Highlight(get) => IpcRequest::DomHighlightRequest {
            session_id: new_session_id(),
            target: get.target.clone(),
        },
        DomCommand::Screenshot(shot) => IpcRequest::DomScreenshotRequest {
            session_id: new_session_id(),
            format: Some(shot.format.clone()),
            quality: shot.quality,
            full_page: shot.full_page,
        },
    };

    let data = request_daemon(&paths, &request).await?;

    if let DomCommand::Screenshot(shot) = &args.command {
        if let Some(path) = &shot.output {
            return save_screenshot(global, shot, path, &data);
        }
    }

    print_output(&data, &global.output)
}

fn save_screenshot(
    global: &GlobalOpts,
    shot: &DomScreenshotArgs,
    path: &std::path::Path,
    data: &serde_json::Value,
) -> Result<(), AppError> {
    let encoded = data["data"].as_str().ok_or_else(|| {
        AppError::new("screenshot response carried no data", ExitCode::ProtocolError)
    })?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| {
            AppError::new(
                format!("could not decode screenshot: {e}"),
                ExitCode::ProtocolError,
            )
        })?;
    std::fs::write(path, &bytes).map_err(|e| {
        AppError::new(
            format!("could not write {}: {e}", path.display()),
            ExitCode::UnhandledException,
        )
    })?;

    let info = SavedScreenshot {
        saved: path.display().to_string(),
        format: shot.format.clone(),
        bytes: bytes.len(),
    };
    print_output(&info, &global.output)
}
