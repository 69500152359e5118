use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::Deserialize;

use super::ChromeError;

/// Browser version information returned by `/json/version`.
#[derive(Debug, Deserialize)]
pub struct BrowserVersion {
    /// The browser name and version (e.g. "Chrome/131.0.6778.85").
    #[serde(rename = "Browser")]
    pub browser: String,

    /// The CDP protocol version (e.g. "1.3").
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,

    /// The browser-level WebSocket debugger URL.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: String,
}

/// A debuggable target (tab, service worker, etc.) from `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    /// Unique target identifier.
    pub id: String,

    /// Target type (e.g. "page", "`service_worker`").
    #[serde(rename = "type")]
    pub target_type: String,

    /// Page title.
    pub title: String,

    /// Current URL.
    pub url: String,

    /// WebSocket URL to debug this specific target.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: Option<String>,
}

/// Query Chrome's `/json/version` endpoint.
///
/// # Errors
///
/// Returns `ChromeError::HttpError` on connection failure or
/// `ChromeError::ParseError` if the response cannot be deserialized.
pub async fn query_version(host: &str, port: u16) -> Result<BrowserVersion, ChromeError> {
    let body = http_request(host, port, "GET", "/json/version").await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::ParseError(e.to_string()))
}

/// Query Chrome's `/json/list` endpoint for debuggable targets.
///
/// # Errors
///
/// Returns `ChromeError::HttpError` on connection failure or
/// `ChromeError::ParseError` if the response cannot be deserialized.
pub async fn query_targets(host: &str, port: u16) -> Result<Vec<TargetInfo>, ChromeError> {
    let body = http_request(host, port, "GET", "/json/list").await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::ParseError(e.to_string()))
}

/// Open a new tab via `PUT /json/new?<url>`.
///
/// This is the HTTP fallback used when `Target.createTarget` is not
/// available on the current connection. Newer Chrome versions require PUT
/// for this endpoint.
///
/// # Errors
///
/// Returns `ChromeError::HttpError` on connection failure or
/// `ChromeError::ParseError` if the response cannot be deserialized.
pub async fn create_target_http(
    host: &str,
    port: u16,
    url: &str,
) -> Result<TargetInfo, ChromeError> {
    let path = format!("/json/new?{}", urlencoding::encode(url));
    let body = http_request(host, port, "PUT", &path).await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::ParseError(e.to_string()))
}

/// Check whether `buf` contains a complete HTTP response (headers plus the
/// full body per Content-Length).
fn is_http_response_complete(buf: &[u8]) -> bool {
    let Some(header_end) = find_header_end(buf) else {
        return false;
    };
    let body_start = header_end + 4; // skip past \r\n\r\n
    let headers = &buf[..header_end];
    match parse_content_length(headers) {
        Some(cl) => buf.len() >= body_start + cl,
        None => true, // no Content-Length; headers are complete, assume body is too
    }
}

/// Find the byte offset of `\r\n\r\n` in `buf`.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `Content-Length` from raw header bytes (case-insensitive).
fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let header_str = std::str::from_utf8(headers).ok()?;
    for line in header_str.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

/// Parse a raw HTTP response buffer into the body string.
///
/// Accepts 2xx status lines and extracts the body after the headers.
fn parse_http_response(buf: &[u8]) -> Result<String, ChromeError> {
    let header_end = find_header_end(buf)
        .ok_or_else(|| ChromeError::HttpError("malformed HTTP response".into()))?;
    let body_start = header_end + 4;

    let headers = std::str::from_utf8(&buf[..header_end])
        .map_err(|e| ChromeError::HttpError(format!("invalid UTF-8 in headers: {e}")))?;

    let status_line = headers
        .lines()
        .next()
        .ok_or_else(|| ChromeError::HttpError("empty response".into()))?;
    let status_ok = status_line
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code.starts_with('2'));
    if !status_ok {
        return Err(ChromeError::HttpError(format!(
            "unexpected HTTP status: {status_line}"
        )));
    }

    let body_bytes = if let Some(cl) = parse_content_length(&buf[..header_end]) {
        let end = (body_start + cl).min(buf.len());
        &buf[body_start..end]
    } else {
        &buf[body_start..]
    };

    String::from_utf8(body_bytes.to_vec())
        .map_err(|e| ChromeError::HttpError(format!("invalid UTF-8 in body: {e}")))
}

/// Perform a one-shot HTTP request against Chrome's debug endpoint using
/// blocking I/O in a `spawn_blocking` context.
async fn http_request(
    host: &str,
    port: u16,
    method: &str,
    path: &str,
) -> Result<String, ChromeError> {
    let addr = format!("{host}:{port}");
    let request =
        format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");

    let (addr_clone, request_clone) = (addr.clone(), request);
    tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect_timeout(
            &addr_clone
                .parse()
                .map_err(|e| ChromeError::HttpError(format!("invalid address: {e}")))?,
            Duration::from_secs(2),
        )
        .map_err(|e| ChromeError::HttpError(format!("connection failed to {addr_clone}: {e}")))?;

        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

        stream
            .write_all(request_clone.as_bytes())
            .map_err(|e| ChromeError::HttpError(format!("write failed: {e}")))?;

        // Read incrementally, stopping once Content-Length bytes of body
        // have arrived. Chrome may keep the connection open past the body.
        let mut buf = Vec::with_capacity(4096);
        let mut tmp = [0u8; 4096];
        loop {
            match stream.read(&mut tmp) {
                Ok(0) => break, // EOF
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if is_http_response_complete(&buf) {
                        break;
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if is_http_response_complete(&buf) {
                        break;
                    }
                    return Err(ChromeError::HttpError(format!("read timed out: {e}")));
                }
                Err(e) => {
                    return Err(ChromeError::HttpError(format!("read failed: {e}")));
                }
            }
        }

        parse_http_response(&buf)
    })
    .await
    .map_err(|e| ChromeError::HttpError(format!("task join failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_browser_version() {
        let json = r#"{
            "Browser": "Chrome/131.0.6778.85",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "V8-Version": "13.1.201.8",
            "WebKit-Version": "537.36",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc-123"
        }"#;
        let v: BrowserVersion = serde_json::from_str(json).unwrap();
        assert_eq!(v.browser, "Chrome/131.0.6778.85");
        assert_eq!(v.protocol_version, "1.3");
        assert!(v.ws_debugger_url.starts_with("ws://"));
    }

    #[test]
    fn parse_target_info() {
        let json = r#"[{
            "description": "",
            "devtoolsFrontendUrl": "/devtools/inspector.html",
            "id": "ABCDEF",
            "title": "Example Domain",
            "type": "page",
            "url": "https://example.com/",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/ABCDEF"
        }]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "ABCDEF");
        assert_eq!(targets[0].target_type, "page");
        assert!(targets[0].ws_debugger_url.is_some());
    }

    #[test]
    fn parse_http_response_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\nHello, world!";
        let body = parse_http_response(raw).unwrap();
        assert_eq!(body, "Hello, world!");
    }

    #[test]
    fn parse_http_response_without_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n{\"ok\":true}";
        let body = parse_http_response(raw).unwrap();
        assert_eq!(body, "{\"ok\":true}");
    }

    #[test]
    fn parse_http_response_accepts_other_2xx() {
        let raw = b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n";
        let body = parse_http_response(raw).unwrap();
        assert_eq!(body, "");
    }

    #[test]
    fn parse_http_response_rejects_4xx() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        assert!(parse_http_response(raw).is_err());
    }

    #[test]
    fn parse_http_response_malformed_no_separator() {
        let raw = b"HTTP/1.1 200 OK\nno double crlf here";
        assert!(parse_http_response(raw).is_err());
    }

    #[test]
    fn is_http_response_complete_with_content_length() {
        let partial = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHe";
        assert!(!is_http_response_complete(partial));

        let complete = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello";
        assert!(is_http_response_complete(complete));
    }

    #[test]
    fn is_http_response_complete_no_headers_yet() {
        assert!(!is_http_response_complete(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn new_tab_path_is_url_encoded() {
        let encoded = urlencoding::encode("https://example.com/a b?q=1");
        let path = format!("/json/new?{encoded}");
        assert!(!path.contains(' '));
        assert!(path.contains("https%3A%2F%2Fexample.com"));
    }
}
