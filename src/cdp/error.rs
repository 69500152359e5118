use std::fmt;

/// Errors that can occur during CDP communication.
#[derive(Debug)]
pub enum CdpError {
    /// WebSocket connection could not be established.
    Connection(String),

    /// A single connection attempt exceeded the configured timeout.
    ConnectionTimeout,

    /// All initial connection attempts were exhausted.
    ConnectExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the last attempt.
        last_error: String,
    },

    /// A command did not receive a response within the configured timeout.
    CommandTimeout {
        /// The CDP method that timed out.
        method: String,
    },

    /// Chrome returned a CDP protocol-level error.
    Protocol {
        /// The CDP error code (e.g. -32000).
        code: i64,
        message: String,
    },

    /// The WebSocket connection closed while the command was pending,
    /// or the client was explicitly closed.
    ConnectionClosed,

    /// A response from Chrome was missing a required field.
    InvalidResponse(String),

    /// Reconnection failed after all retry attempts were exhausted.
    ReconnectFailed {
        attempts: u32,
        last_error: String,
    },

    /// Internal error (transport task died or channel closed).
    Internal(String),
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "CDP connection error: {msg}"),
            Self::ConnectionTimeout => write!(f, "CDP connection timed out"),
            Self::ConnectExhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "CDP connection failed after {attempts} attempts: {last_error}"
                )
            }
            Self::CommandTimeout { method } => {
                write!(f, "CDP command timed out: {method}")
            }
            Self::Protocol { code, message } => {
                write!(f, "CDP protocol error ({code}): {message}")
            }
            Self::ConnectionClosed => write!(f, "CDP connection closed"),
            Self::InvalidResponse(msg) => {
                write!(f, "CDP invalid response: {msg}")
            }
            Self::ReconnectFailed {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "CDP reconnection failed after {attempts} attempts: {last_error}"
                )
            }
            Self::Internal(msg) => write!(f, "CDP internal error: {msg}"),
        }
    }
}

impl std::error::Error for CdpError {}

impl From<CdpError> for crate::error::AppError {
    fn from(e: CdpError) -> Self {
        use crate::error::ExitCode;
        let code = match &e {
            CdpError::Connection(_)
            | CdpError::ConnectionClosed
            | CdpError::ConnectExhausted { .. }
            | CdpError::ReconnectFailed { .. } => ExitCode::ConnectionError,
            CdpError::ConnectionTimeout | CdpError::CommandTimeout { .. } => ExitCode::TimeoutError,
            CdpError::Protocol { .. } => ExitCode::ProtocolError,
            CdpError::InvalidResponse(_) | CdpError::Internal(_) => ExitCode::UnhandledException,
        };
        Self {
            message: e.to_string(),
            code,
            custom_json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_connection() {
        let err = CdpError::Connection("refused".into());
        assert_eq!(err.to_string(), "CDP connection error: refused");
    }

    #[test]
    fn display_connect_exhausted() {
        let err = CdpError::ConnectExhausted {
            attempts: 3,
            last_error: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "CDP connection failed after 3 attempts: refused"
        );
    }

    #[test]
    fn display_command_timeout() {
        let err = CdpError::CommandTimeout {
            method: "Target.getTargets".into(),
        };
        assert_eq!(err.to_string(), "CDP command timed out: Target.getTargets");
    }

    #[test]
    fn display_protocol() {
        let err = CdpError::Protocol {
            code: -32000,
            message: "No resource with given identifier found".into(),
        };
        assert_eq!(
            err.to_string(),
            "CDP protocol error (-32000): No resource with given identifier found"
        );
    }

    #[test]
    fn display_reconnect_failed() {
        let err = CdpError::ReconnectFailed {
            attempts: 5,
            last_error: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "CDP reconnection failed after 5 attempts: connection refused"
        );
    }

    #[test]
    fn timeouts_map_to_timeout_exit_code() {
        use crate::error::{AppError, ExitCode};
        let app: AppError = CdpError::ConnectionTimeout.into();
        assert_eq!(app.code, ExitCode::TimeoutError);
        let app: AppError = CdpError::CommandTimeout {
            method: "Page.enable".into(),
        }
        .into();
        assert_eq!(app.code, ExitCode::TimeoutError);
    }

    #[test]
    fn protocol_maps_to_protocol_exit_code() {
        use crate::error::{AppError, ExitCode};
        let app: AppError = CdpError::Protocol {
            code: -32601,
            message: "not found".into(),
        }
        .into();
        assert_eq!(app.code, ExitCode::ProtocolError);
    }
}
