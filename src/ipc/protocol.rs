//! IPC wire protocol: JSONL-framed request/response envelopes.
//!
//! Each frame is one JSON object terminated by `\n`. A request carries a
//! `type` of the form `<name>_request` and a client-chosen `sessionId`
//! (a UUID per request); the response echoes both as `<name>_response`
//! and the same `sessionId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session id used in synthetic responses to unparseable requests.
pub const UNKNOWN_SESSION: &str = "unknown";

/// Which telemetry collection an item id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Network,
    Console,
}

/// A decoded IPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    #[serde(rename_all = "camelCase")]
    HandshakeRequest { session_id: String },

    #[serde(rename_all = "camelCase")]
    StatusRequest { session_id: String },

    #[serde(rename_all = "camelCase")]
    PeekRequest {
        session_id: String,
        #[serde(default)]
        last_n: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },

    #[serde(rename_all = "camelCase")]
    DetailsRequest {
        session_id: String,
        item_type: ItemType,
        id: String,
    },

    #[serde(rename_all = "camelCase")]
    CdpCallRequest {
        session_id: String,
        method: String,
        #[serde(default)]
        params: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    DomQueryRequest {
        session_id: String,
        selector: String,
        #[serde(default)]
        limit: Option<usize>,
    },

    #[serde(rename_all = "camelCase")]
    DomGetRequest { session_id: String, target: String },

    #[serde(rename_all = "camelCase")]
    DomHighlightRequest { session_id: String, target: String },

    #[serde(rename_all = "camelCase")]
    DomScreenshotRequest {
        session_id: String,
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        quality: Option<u8>,
        #[serde(default)]
        full_page: bool,
    },

    #[serde(rename_all = "camelCase")]
    StartSessionRequest {
        session_id: String,
        #[serde(default)]
        url: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    StopSessionRequest {
        session_id: String,
        #[serde(default)]
        kill_chrome: bool,
    },
}

impl IpcRequest {
    /// The client-chosen session id of this request.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::HandshakeRequest { session_id }
            | Self::StatusRequest { session_id }
            | Self::PeekRequest { session_id, .. }
            | Self::DetailsRequest { session_id, .. }
            | Self::CdpCallRequest { session_id, .. }
            | Self::DomQueryRequest { session_id, .. }
            | Self::DomGetRequest { session_id, .. }
            | Self::DomHighlightRequest { session_id, .. }
            | Self::DomScreenshotRequest { session_id, .. }
            | Self::StartSessionRequest { session_id, .. }
            | Self::StopSessionRequest { session_id, .. } => session_id,
        }
    }

    /// The `type` value of the matching response.
    #[must_use]
    pub fn response_type(&self) -> &'static str {
        match self {
            Self::HandshakeRequest { .. } => "handshake_response",
            Self::StatusRequest { .. } => "status_response",
            Self::PeekRequest { .. } => "peek_response",
            Self::DetailsRequest { .. } => "details_response",
            Self::CdpCallRequest { .. } => "cdp_call_response",
            Self::DomQueryRequest { .. } => "dom_query_response",
            Self::DomGetRequest { .. } => "dom_get_response",
            Self::DomHighlightRequest { .. } => "dom_highlight_response",
            Self::DomScreenshotRequest { .. } => "dom_screenshot_response",
            Self::StartSessionRequest { .. } => "start_session_response",
            Self::StopSessionRequest { .. } => "stop_session_response",
        }
    }
}

/// All recognized request `type` values.
const KNOWN_REQUEST_TYPES: &[&str] = &[
    "handshake_request",
    "status_request",
    "peek_request",
    "details_request",
    "cdp_call_request",
    "dom_query_request",
    "dom_get_request",
    "dom_highlight_request",
    "dom_screenshot_request",
    "start_session_request",
    "stop_session_request",
];

/// Is this a request type the server knows about?
#[must_use]
pub fn is_known_request_type(kind: &str) -> bool {
    KNOWN_REQUEST_TYPES.contains(&kind)
}

/// Structured error codes for session-control responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpcErrorCode {
    NoSession,
    SessionKillFailed,
    SessionAlreadyRunning,
    WorkerStartFailed,
    ChromeLaunchFailed,
    CdpTimeout,
    DaemonError,
}

/// Response status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// An IPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpcResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<IpcErrorCode>,
}

impl IpcResponse {
    /// Success response for a request.
    #[must_use]
    pub fn ok(request: &IpcRequest, data: Value) -> Self {
        Self {
            kind: request.response_type().to_string(),
            session_id: request.session_id().to_string(),
            status: ResponseStatus::Ok,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    /// Error response for a request.
    #[must_use]
    pub fn error(request: &IpcRequest, message: impl Into<String>, code: Option<IpcErrorCode>) -> Self {
        Self {
            kind: request.response_type().to_string(),
            session_id: request.session_id().to_string(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(message.into()),
            error_code: code,
        }
    }

    /// Synthetic response to a frame that could not be parsed at all.
    #[must_use]
    pub fn parse_error(detail: &str) -> Self {
        Self {
            kind: "error_response".to_string(),
            session_id: UNKNOWN_SESSION.to_string(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(format!("invalid request: {detail}")),
            error_code: None,
        }
    }

    /// Response to a structurally valid frame whose `type` is not a
    /// recognized command, or whose payload is malformed.
    #[must_use]
    pub fn rejected(kind: &str, session_id: &str, message: impl Into<String>) -> Self {
        let response_kind = kind
            .strip_suffix("_request")
            .map_or_else(|| "error_response".to_string(), |base| format!("{base}_response"));
        Self {
            kind: response_kind,
            session_id: session_id.to_string(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(message.into()),
            error_code: None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Convert into the payload, or an `AppError` carrying the stable
    /// exit code for the response's error code.
    ///
    /// # Errors
    ///
    /// Returns `AppError` when the response status is `error`.
    pub fn into_result(self) -> Result<Value, crate::error::AppError> {
        use crate::error::{AppError, ExitCode};
        if self.is_ok() {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let code = match self.error_code {
            Some(IpcErrorCode::NoSession) => ExitCode::ResourceNotFound,
            Some(IpcErrorCode::SessionAlreadyRunning) => ExitCode::ResourceBusy,
            Some(IpcErrorCode::CdpTimeout) => ExitCode::TimeoutError,
            Some(IpcErrorCode::ChromeLaunchFailed) => ExitCode::ConnectionError,
            Some(
                IpcErrorCode::SessionKillFailed
                | IpcErrorCode::WorkerStartFailed
                | IpcErrorCode::DaemonError,
            )
            | None => ExitCode::UnhandledException,
        };
        Err(AppError::new(
            self.error.unwrap_or_else(|| "daemon error".to_string()),
            code,
        ))
    }
}

/// Generate a fresh per-request session id.
#[must_use]
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
