use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of telemetry a session can collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Network,
    Console,
    Dom,
}

impl TelemetryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Console => "console",
            Self::Dom => "dom",
        }
    }
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the session's Chrome tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// A completed (or failed) network request, immutable once appended to
/// the ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestRecord {
    /// CDP request id, unique within the session.
    pub request_id: String,
    pub url: String,
    pub method: String,
    /// Wall-clock capture time, milliseconds since epoch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Value>,
    /// HTTP status; the sentinel 0 marks a request that failed before a
    /// response arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

/// A console message or uncaught exception, immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessageRecord {
    /// CDP log level (`log|info|warning|error|debug|...`); exceptions are
    /// synthesized as `error`.
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: String,
    /// Wall-clock capture time, milliseconds since epoch.
    pub timestamp: u64,
    /// Stringified arguments, when the message had more than plain text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// One-shot DOM capture taken during shutdown or on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub url: String,
    pub title: String,
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
}
