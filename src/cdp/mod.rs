mod client;
mod error;
mod transport;
mod types;

pub use client::{CdpClient, CdpConfig, CdpSession, extract_port_from_ws_url};
pub use error::CdpError;
pub use transport::{ConnectConfig, KeepaliveConfig, ReconnectConfig, ReconnectEvent};
pub use types::{CdpEvent, CdpResponse};
