//! IPC server: accepts connections on the daemon's Unix socket, decodes
//! JSONL-framed requests, dispatches them, and writes JSONL responses.
//!
//! Connections carry sequential requests and get responses in request
//! order. An idle connection is dropped after the read deadline; clients
//! normally close right after their single request, and abrupt closes
//! must not leak tasks or pending handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::IpcError;
use super::protocol::{IpcRequest, IpcResponse, UNKNOWN_SESSION, is_known_request_type};

/// How long a connection may sit idle between requests.
const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Dispatch target for decoded requests.
pub trait IpcHandler: Send + Sync + 'static {
    fn handle(&self, request: IpcRequest) -> impl Future<Output = IpcResponse> + Send;
}

/// A bound, not yet serving, IPC listener.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the Unix socket at `path`: any stale socket file is removed
    /// first, and the fresh one gets owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::Io` when binding fails.
    pub fn bind(path: &Path) -> Result<Self, IpcError> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IpcError::Io(e)),
        }

        let listener = UnixListener::bind(path).map_err(IpcError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(IpcError::Io)?;
        }

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the accept loop on a background task. Aborting the returned
    /// handle stops new connections; in-flight connections drain on
    /// their own read deadlines.
    pub fn spawn<H: IpcHandler>(self, handler: Arc<H>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, _addr)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(serve_connection(stream, handler));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "IPC accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        })
    }
}

/// Decode one request line, or produce the error response that should be
/// written instead.
fn decode_request(line: &str) -> Result<IpcRequest, IpcResponse> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Err(IpcResponse::parse_error(&e.to_string())),
    };

    let kind = value["type"].as_str().unwrap_or("").to_string();
    let session_id = value["sessionId"]
        .as_str()
        .unwrap_or(UNKNOWN_SESSION)
        .to_string();

    match serde_json::from_value::<IpcRequest>(value) {
        Ok(request) => Ok(request),
        Err(e) if is_known_request_type(&kind) => Err(IpcResponse::rejected(
            &kind,
            &session_id,
            format!("invalid request: {e}"),
        )),
        Err(_) => Err(IpcResponse::rejected(&kind, &session_id, "unknown command")),
    }
}

async fn serve_connection<H: IpcHandler>(stream: UnixStream, handler: Arc<H>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let response = match tokio::time::timeout(READ_DEADLINE, reader.read_line(&mut line)).await
        {
            Err(_elapsed) => break, // idle deadline
            Ok(Ok(0)) => break,     // client closed
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "IPC read failed");
                break;
            }
            Ok(Ok(_)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match decode_request(trimmed) {
                    Ok(request) => handler.handle(request).await,
                    Err(error_response) => error_response,
                }
            }
        };

        let mut payload = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"type":"error_response","sessionId":"unknown","status":"error","error":"serialization failure"}"#
                .to_string()
        });
        payload.push('\n');
        if write_half.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}
