use std::fmt;

use serde::Serialize;

/// Stable process exit codes for the `bdg` CLI.
///
/// Scripts depend on these values; changing an existing mapping is a
/// breaking change.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    UnhandledException = 1,
    InvalidArguments = 2,
    ConnectionError = 3,
    TimeoutError = 4,
    ProtocolError = 5,
    ResourceNotFound = 6,
    ResourceBusy = 7,
    DaemonAlreadyRunning = 8,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::UnhandledException => write!(f, "unhandled exception"),
            Self::InvalidArguments => write!(f, "invalid arguments"),
            Self::ConnectionError => write!(f, "connection error"),
            Self::TimeoutError => write!(f, "timeout error"),
            Self::ProtocolError => write!(f, "protocol error"),
            Self::ResourceNotFound => write!(f, "resource not found"),
            Self::ResourceBusy => write!(f, "resource busy"),
            Self::DaemonAlreadyRunning => write!(f, "daemon already running"),
        }
    }
}

/// Top-level application error carried to the CLI boundary.
///
/// `custom_json` replaces the default `{"error":...,"code":...}` stderr
/// payload when a command needs to emit a richer structured error.
#[derive(Debug)]
pub struct AppError {
    pub message: String,
    pub code: ExitCode,
    pub custom_json: Option<String>,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn new(message: impl Into<String>, code: ExitCode) -> Self {
        Self {
            message: message.into(),
            code,
            custom_json: None,
        }
    }

    /// "No active session" — the daemon socket and session files are absent.
    pub fn no_session() -> Self {
        Self::new("no active session", ExitCode::ResourceNotFound)
    }

    /// A live daemon already holds the daemon lock.
    pub fn daemon_already_running(pid: u32) -> Self {
        Self::new(
            format!("a bdg daemon is already running (pid {pid})"),
            ExitCode::DaemonAlreadyRunning,
        )
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::InvalidArguments)
    }

    pub fn to_json(&self) -> String {
        if let Some(custom) = &self.custom_json {
            return custom.clone();
        }
        let output = ErrorOutput {
            error: &self.message,
            code: self.code as u8,
        };
        serde_json::to_string(&output).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","code":{}}}"#,
                self.message, self.code as u8
            )
        })
    }

    pub fn print_json_stderr(&self) {
        eprintln!("{}", self.to_json());
    }
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    code: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_session_maps_to_resource_not_found() {
        let err = AppError::no_session();
        assert_eq!(err.code as u8, 6);
        let json = err.to_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["error"], "no active session");
        assert_eq!(parsed["code"], 6);
    }

    #[test]
    fn exit_code_values_are_stable() {
        assert_eq!(ExitCode::Success as u8, 0);
        assert_eq!(ExitCode::UnhandledException as u8, 1);
        assert_eq!(ExitCode::InvalidArguments as u8, 2);
        assert_eq!(ExitCode::ConnectionError as u8, 3);
        assert_eq!(ExitCode::TimeoutError as u8, 4);
        assert_eq!(ExitCode::ProtocolError as u8, 5);
        assert_eq!(ExitCode::ResourceNotFound as u8, 6);
        assert_eq!(ExitCode::ResourceBusy as u8, 7);
        assert_eq!(ExitCode::DaemonAlreadyRunning as u8, 8);
    }

    #[test]
    fn exit_code_display() {
        assert_eq!(ExitCode::Success.to_string(), "success");
        assert_eq!(ExitCode::ResourceNotFound.to_string(), "resource not found");
        assert_eq!(
            ExitCode::DaemonAlreadyRunning.to_string(),
            "daemon already running"
        );
    }

    #[test]
    fn app_error_display() {
        let err = AppError::no_session();
        assert_eq!(err.to_string(), "resource not found: no active session");
    }

    #[test]
    fn custom_json_overrides_default_payload() {
        let err = AppError {
            message: "boom".into(),
            code: ExitCode::UnhandledException,
            custom_json: Some(r#"{"error":"boom","detail":"extra"}"#.into()),
        };
        let parsed: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();
        assert_eq!(parsed["detail"], "extra");
    }
}
