//! `bdg cleanup` — remove files left behind by a crashed session.

use bdg::error::AppError;
use bdg::session;

use crate::cli::GlobalOpts;
use crate::support::{print_output, resolve_paths};

pub fn execute_cleanup(global: &GlobalOpts) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;
    let report = session::cleanup_stale(&paths)?;

    if global.output.plain {
        if report.session_active {
            println!("a live session owns these files; nothing removed");
        } else if report.removed.is_empty() {
            println!("nothing to clean up");
        } else {
            println!("removed: {}", report.removed.join(", "));
        }
        return Ok(());
    }
    print_output(&report, &global.output)
}
