mod discovery;
mod error;
mod launcher;
mod platform;

pub use discovery::{BrowserVersion, TargetInfo, create_target_http, query_targets, query_version};
pub use error::ChromeError;
pub use launcher::{ChromeProcess, LaunchConfig, find_available_port, launch_chrome};
pub use platform::find_chrome_executable;
