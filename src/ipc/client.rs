//! IPC client: dial the daemon socket, perform one request/response
//! exchange, validate the echoed session id.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::Duration;

use super::IpcError;
use super::protocol::{IpcRequest, IpcResponse};

/// Whole-exchange deadline. Generous enough for a `cdp_call` that uses
/// its full 30s command budget on the daemon side.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Perform a single request/response exchange against the daemon socket.
///
/// # Errors
///
/// Returns `IpcError::NoDaemon` when the socket is absent or refuses,
/// `IpcError::Timeout` on deadline, `IpcError::SessionMismatch` when the
/// response does not echo the request's session id, and
/// `IpcError::InvalidResponse` on framing violations.
pub async fn request(sock: &Path, request: &IpcRequest) -> Result<IpcResponse, IpcError> {
    match tokio::time::timeout(REQUEST_TIMEOUT, exchange(sock, request)).await {
        Ok(result) => result,
        Err(_) => Err(IpcError::Timeout),
    }
}

async fn exchange(sock: &Path, request: &IpcRequest) -> Result<IpcResponse, IpcError> {
    let stream = match UnixStream::connect(sock).await {
        Ok(stream) => stream,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Err(IpcError::NoDaemon);
        }
        Err(e) => return Err(IpcError::Io(e)),
    };

    let (read_half, mut write_half) = stream.into_split();

    let mut payload = serde_json::to_string(request)
        .map_err(|e| IpcError::InvalidResponse(format!("request serialization: {e}")))?;
    payload.push('\n');
    write_half.write_all(payload.as_bytes()).await.map_err(IpcError::Io)?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let read = reader.read_line(&mut line).await.map_err(IpcError::Io)?;
    if read == 0 {
        return Err(IpcError::InvalidResponse(
            "connection closed before response".into(),
        ));
    }

    let response: IpcResponse = serde_json::from_str(line.trim())
        .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;

    if response.session_id != request.session_id() {
        return Err(IpcError::SessionMismatch {
            expected: request.session_id().to_string(),
            got: response.session_id,
        });
    }

    Ok(response)
}
