use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing CDP command (client to Chrome).
#[derive(Debug, Serialize)]
pub struct CdpCommand {
    /// Message ID for response correlation. Strictly increasing per client.
    pub id: u64,
    /// CDP method name in canonical casing (e.g. `Network.enable`).
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Session ID for commands routed to an attached target.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Raw incoming CDP message before classification.
///
/// Every incoming frame is deserialized into this union of response and
/// event fields, then split via [`classify`](Self::classify).
#[derive(Debug, Deserialize)]
pub struct RawCdpMessage {
    /// Present for responses; absent for events.
    pub id: Option<u64>,
    /// Present for events.
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<CdpProtocolError>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Protocol-level error payload returned by Chrome.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpProtocolError {
    /// JSON-RPC style error code (e.g. -32000).
    pub code: i64,
    pub message: String,
}

/// Parsed CDP response (a frame carrying an `id`).
#[derive(Debug)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Result<Value, CdpProtocolError>,
    pub session_id: Option<String>,
}

/// Parsed CDP event (a frame carrying a `method` but no `id`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event name (e.g. `Network.requestWillBeSent`).
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Classification of a raw incoming message.
pub enum MessageKind {
    Response(CdpResponse),
    Event(CdpEvent),
}

impl RawCdpMessage {
    /// Split a raw message into a response (has `id`) or an event (has
    /// `method` but no `id`). Returns `None` when neither is present;
    /// such frames are discarded by the transport.
    #[must_use]
    pub fn classify(self) -> Option<MessageKind> {
        if let Some(id) = self.id {
            let result = if let Some(error) = self.error {
                Err(error)
            } else {
                Ok(self.result.unwrap_or(Value::Null))
            };
            Some(MessageKind::Response(CdpResponse {
                id,
                result,
                session_id: self.session_id,
            }))
        } else if let Some(method) = self.method {
            Some(MessageKind::Event(CdpEvent {
                method,
                params: self.params.unwrap_or(Value::Null),
                session_id: self.session_id,
            }))
        } else {
            None
        }
    }
}
