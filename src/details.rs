//! `bdg details` — one captured item in full.

use bdg::error::AppError;
use bdg::ipc::{IpcRequest, ItemType, new_session_id};

use crate::cli::{DetailsArgs, GlobalOpts, ItemTypeArg};
use crate::support::{print_output, request_daemon, resolve_paths};

pub async fn execute_details(global: &GlobalOpts, args: &DetailsArgs) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;

    let item_type = match args.item_type {
        ItemTypeArg::Network => ItemType::Network,
        ItemTypeArg::Console => ItemType::Console,
    };
    let request = IpcRequest::DetailsRequest {
        session_id: new_session_id(),
        item_type,
        id: args.id.clone(),
    };
    let data = request_daemon(&paths, &request).await?;
    print_output(&data, &global.output)
}
