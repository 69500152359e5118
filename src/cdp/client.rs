use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

use super::error::CdpError;
use super::transport::{
    ConnectConfig, KeepaliveConfig, ReconnectConfig, ReconnectEvent, TransportCommand,
    TransportHandle, spawn_transport,
};
use super::types::CdpEvent;

/// Configuration for a CDP client connection.
#[derive(Debug, Clone, Default)]
pub struct CdpConfig {
    /// Initial connection settings (timeout, attempts, backoff).
    pub connect: ConnectConfig,
    /// Keepalive ping settings.
    pub keepalive: KeepaliveConfig,
    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
    /// Timeout for individual CDP commands (default: 30s).
    pub command_timeout: Duration,
    /// Capacity of internal channels (default: 256).
    pub channel_capacity: usize,
}

impl CdpConfig {
    /// Normalize zero-valued fields left by `Default` to their documented
    /// defaults.
    fn normalized(mut self) -> Self {
        if self.command_timeout.is_zero() {
            self.command_timeout = Duration::from_secs(30);
        }
        if self.channel_capacity == 0 {
            self.channel_capacity = 256;
        }
        self
    }
}

/// A CDP client connected to Chrome over WebSocket.
///
/// The main entry point for sending CDP commands and subscribing to
/// events. It communicates with a background transport task that owns the
/// WebSocket connection; the client itself is cheap to share behind an
/// `Arc` across collector and IPC-handler tasks.
#[derive(Debug)]
pub struct CdpClient {
    handle: TransportHandle,
    config: CdpConfig,
    url: String,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::ConnectExhausted` when every configured
    /// connection attempt fails.
    pub async fn connect(url: &str, config: CdpConfig) -> Result<Self, CdpError> {
        let config = config.normalized();
        let handle = spawn_transport(
            url,
            config.channel_capacity,
            config.connect.clone(),
            config.keepalive.clone(),
            config.reconnect.clone(),
        )
        .await?;

        Ok(Self {
            handle,
            config,
            url: url.to_owned(),
        })
    }

    /// Send a CDP command on the connection's root scope.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::CommandTimeout` if Chrome does not respond in
    /// time, `CdpError::Protocol` if Chrome returns an error payload,
    /// `CdpError::ConnectionClosed` if the socket closed while the
    /// command was pending, or `CdpError::Internal` if the transport task
    /// has exited.
    pub async fn send_command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        send_command_impl(&self.handle, self.config.command_timeout, method, params, None).await
    }

    /// Subscribe to CDP events matching a method name.
    ///
    /// Returns a receiver yielding `CdpEvent` values in the order Chrome
    /// sent them. Dropping the receiver unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task has exited.
    pub async fn subscribe(&self, method: &str) -> Result<mpsc::Receiver<CdpEvent>, CdpError> {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        self.handle
            .send(TransportCommand::Subscribe {
                method: method.to_owned(),
                event_tx,
            })
            .await?;
        Ok(event_rx)
    }

    /// Subscribe to reconnect lifecycle notifications.
    ///
    /// After a `Reconnected` event the caller must re-enable any CDP
    /// domains it depends on; a `Gone` event means the connection is
    /// permanently lost.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task has exited.
    pub async fn reconnect_events(&self) -> Result<mpsc::Receiver<ReconnectEvent>, CdpError> {
        let (event_tx, event_rx) = mpsc::channel(8);
        self.handle
            .send(TransportCommand::WatchReconnects { event_tx })
            .await?;
        Ok(event_rx)
    }

    /// Create a CDP session attached to a specific target.
    ///
    /// Sends `Target.attachToTarget` (flat mode) and returns a
    /// `CdpSession` bound to the returned session ID.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Protocol` if the target cannot be attached, or
    /// `CdpError::InvalidResponse` if the reply lacks a session ID.
    pub async fn create_session(&self, target_id: &str) -> Result<CdpSession, CdpError> {
        let params = serde_json::json!({
            "targetId": target_id,
            "flatten": true,
        });
        let result = self
            .send_command("Target.attachToTarget", Some(params))
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| {
                CdpError::InvalidResponse(
                    "Target.attachToTarget response missing sessionId".into(),
                )
            })?
            .to_owned();

        Ok(CdpSession {
            session_id,
            handle: self.handle.clone(),
            command_timeout: self.config.command_timeout,
        })
    }

    /// Close the WebSocket connection. Idempotent: closing an already
    /// closed client is a no-op. Pending requests fail with
    /// `ConnectionClosed`; subscriptions end.
    pub async fn close(&self) {
        let _ = self.handle.send(TransportCommand::Shutdown).await;
    }

    /// Check if the client is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Get the WebSocket URL this client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The TCP port parsed from the WebSocket URL, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        extract_port_from_ws_url(&self.url)
    }
}

/// A CDP session bound to a specific attached target.
///
/// Sessions share the parent client's WebSocket connection but route
/// commands through a `sessionId`.
#[derive(Debug, Clone)]
pub struct CdpSession {
    session_id: String,
    handle: TransportHandle,
    command_timeout: Duration,
}

impl CdpSession {
    /// Send a command within this session's scope.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`CdpClient::send_command`].
    pub async fn send_command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        send_command_impl(
            &self.handle,
            self.command_timeout,
            method,
            params,
            Some(self.session_id.clone()),
        )
        .await
    }

    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Extract the port from a WebSocket URL like `ws://host:port/path`.
#[must_use]
pub fn extract_port_from_ws_url(url: &str) -> Option<u16> {
    let without_scheme = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))?;
    let host_port = without_scheme.split('/').next()?;
    let port_str = host_port.rsplit(':').next()?;
    port_str.parse().ok()
}

/// Send a CDP command via the transport handle and await the response.
async fn send_command_impl(
    handle: &TransportHandle,
    command_timeout: Duration,
    method: &str,
    params: Option<serde_json::Value>,
    session_id: Option<String>,
) -> Result<serde_json::Value, CdpError> {
    let id = handle.next_message_id();
    let command = super::types::CdpCommand {
        id,
        method: method.to_owned(),
        params,
        session_id,
    };

    let (response_tx, response_rx) = oneshot::channel();
    let deadline = Instant::now() + command_timeout;

    handle
        .send(TransportCommand::SendCommand {
            command,
            response_tx,
            deadline,
        })
        .await?;

    response_rx
        .await
        .map_err(|_| CdpError::Internal("transport task exited before responding".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_port_ws() {
        assert_eq!(
            extract_port_from_ws_url("ws://127.0.0.1:9222/devtools/browser/abc"),
            Some(9222)
        );
    }

    #[test]
    fn extract_port_wss() {
        assert_eq!(
            extract_port_from_ws_url("wss://localhost:9333/devtools/page/xyz"),
            Some(9333)
        );
    }

    #[test]
    fn extract_port_rejects_non_ws_scheme() {
        assert_eq!(extract_port_from_ws_url("http://localhost:9222"), None);
    }

    #[test]
    fn extract_port_rejects_missing_port() {
        assert_eq!(extract_port_from_ws_url("ws://nohost/devtools"), None);
    }

    #[test]
    fn config_normalization_fills_defaults() {
        let config = CdpConfig::default().normalized();
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.connect.timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive.interval, Duration::from_secs(30));
        assert_eq!(config.keepalive.max_missed, 3);
        assert!(!config.reconnect.enabled);
        assert_eq!(config.reconnect.max_retries, 5);
    }
}
