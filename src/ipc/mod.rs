//! Local IPC between the CLI and the session daemon: a Unix stream
//! socket carrying JSON Lines request/response frames.

pub mod client;
mod protocol;
mod server;

use std::fmt;

pub use protocol::{
    IpcErrorCode, IpcRequest, IpcResponse, ItemType, ResponseStatus, UNKNOWN_SESSION,
    is_known_request_type, new_session_id,
};
pub use server::{IpcHandler, IpcServer};

/// Errors from the IPC client or server plumbing.
#[derive(Debug)]
pub enum IpcError {
    /// The daemon socket does not exist or refused the connection.
    NoDaemon,
    /// The exchange exceeded its deadline.
    Timeout,
    /// Socket I/O failure.
    Io(std::io::Error),
    /// The peer violated the framing or envelope contract.
    InvalidResponse(String),
    /// The response's session id does not match the request's.
    SessionMismatch { expected: String, got: String },
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDaemon => write!(f, "no daemon is listening"),
            Self::Timeout => write!(f, "IPC request timed out"),
            Self::Io(e) => write!(f, "IPC socket error: {e}"),
            Self::InvalidResponse(msg) => write!(f, "invalid IPC response: {msg}"),
            Self::SessionMismatch { expected, got } => {
                write!(f, "IPC session id mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IpcError> for crate::error::AppError {
    fn from(e: IpcError) -> Self {
        use crate::error::ExitCode;
        match e {
            // An absent daemon degrades to "no active session".
            IpcError::NoDaemon => Self::no_session(),
            IpcError::Timeout => Self::new(e.to_string(), ExitCode::TimeoutError),
            IpcError::Io(_) => Self::new(e.to_string(), ExitCode::ConnectionError),
            IpcError::InvalidResponse(_) | IpcError::SessionMismatch { .. } => {
                Self::new(e.to_string(), ExitCode::ProtocolError)
            }
        }
    }
}
