//! `bdg cdp` — raw CDP passthrough with method-name normalization.

use serde::Serialize;

use bdg::error::AppError;
use bdg::ipc::{IpcRequest, new_session_id};
use bdg::schema::ProtocolSchema;

use crate::cli::{CdpArgs, GlobalOpts};
use crate::support::{print_output, request_daemon, resolve_paths};

#[derive(Serialize)]
struct MethodList<'a> {
    count: usize,
    methods: Vec<&'a str>,
}

pub async fn execute_cdp(global: &GlobalOpts, args: &CdpArgs) -> Result<(), AppError> {
    if args.list {
        // Listing is served from the bundled schema; no daemon needed.
        let schema = ProtocolSchema::load().map_err(|e| {
            AppError::new(
                format!("bundled protocol schema is invalid: {e}"),
                bdg::error::ExitCode::UnhandledException,
            )
        })?;
        let prefix = args.method.as_deref().unwrap_or("");
        let methods = schema.methods_with_prefix(prefix);
        let list = MethodList {
            count: methods.len(),
            methods,
        };
        if global.output.plain {
            for method in &list.methods {
                println!("{method}");
            }
            return Ok(());
        }
        return print_output(&list, &global.output);
    }

    let Some(method) = &args.method else {
        return Err(AppError::invalid_arguments(
            "a CDP method is required (or --list to enumerate them)",
        ));
    };

    let params = match &args.params {
        Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
            AppError::invalid_arguments(format!("params is not valid JSON: {e}"))
        })?),
        None => None,
    };

    let paths = resolve_paths(global)?;
    let request = IpcRequest::CdpCallRequest {
        session_id: new_session_id(),
        method: method.clone(),
        params,
    };
    let data = request_daemon(&paths, &request).await?;
    print_output(&data, &global.output)
}
