//! Integration tests for the IPC server, client, and command registry.
//!
//! Framing tests drive the server with a stub handler over raw socket
//! I/O; the registry tests stand up the full daemon dispatch path backed
//! by a mock CDP server.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use bdg::cdp::{CdpClient, CdpConfig, ConnectConfig, ReconnectConfig};
use bdg::daemon::{CommandRegistry, ShutdownReason};
use bdg::ipc::{self, IpcHandler, IpcRequest, IpcResponse, IpcServer, new_session_id};
use bdg::schema::ProtocolSchema;
use bdg::telemetry::{
    ConsoleMessageRecord, NetworkRequestRecord, SharedStore, TargetSummary, TelemetryKind,
    TelemetryStore, lock_store,
};

// =============================================================================
// Helpers
// =============================================================================

/// Stub handler that answers every request with an ok envelope carrying
/// the request's response type.
struct StubHandler;

impl IpcHandler for StubHandler {
    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        IpcResponse::ok(&request, json!({"handled": request.response_type()}))
    }
}

async fn start_stub_server(dir: &std::path::Path) -> std::path::PathBuf {
    let sock = dir.join("daemon.sock");
    let server = IpcServer::bind(&sock).unwrap();
    server.spawn(Arc::new(StubHandler));
    sock
}

/// One raw JSONL exchange over an already connected stream.
async fn raw_exchange(stream: &mut BufReader<UnixStream>, line: &str) -> Value {
    stream
        .get_mut()
        .write_all(format!("{line}\n").as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_line(&mut response).await.unwrap();
    serde_json::from_str(response.trim()).unwrap()
}

/// Mock CDP server echoing `{"id": N, "result": {"method": <method>}}`.
async fn start_cdp_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    if let Message::Text(text) = msg {
                        let cmd: Value = serde_json::from_str(&text).unwrap();
                        let response = json!({
                            "id": cmd["id"],
                            "result": {"method": cmd["method"]}
                        });
                        sink.send(Message::Text(response.to_string().into()))
                            .await
                            .unwrap();
                    }
                }
            });
        }
    });
    addr
}

fn seeded_store() -> SharedStore {
    let store = TelemetryStore::shared();
    {
        let mut locked = lock_store(&store);
        locked.set_target(TargetSummary {
            id: "TAB1".into(),
            url: "https://example.com/".into(),
            title: "Example Domain".into(),
        });
        locked.set_active(vec![TelemetryKind::Network, TelemetryKind::Console]);
        for i in 0..15 {
            locked.push_network(NetworkRequestRecord {
                request_id: format!("1000.{i}"),
                url: format!("https://example.com/asset/{i}"),
                method: "GET".into(),
                timestamp: 1_000 + i,
                request_headers: None,
                status: Some(200),
                mime_type: Some("text/html".into()),
                response_headers: None,
                response_body: None,
                failed: false,
            });
        }
        locked.push_console(ConsoleMessageRecord {
            msg_type: "error".into(),
            text: "boom".into(),
            timestamp: 2_000,
            args: None,
        });
    }
    store
}

struct Daemonish {
    sock: std::path::PathBuf,
    shutdown_rx: mpsc::Receiver<ShutdownReason>,
    _dir: tempfile::TempDir,
}

/// Stand up registry + IPC server backed by the mock CDP endpoint.
async fn start_registry_server(store: SharedStore) -> Daemonish {
    let cdp_addr = start_cdp_echo_server().await;
    let config = CdpConfig {
        connect: ConnectConfig {
            timeout: std::time::Duration::from_secs(5),
            max_attempts: 1,
            max_backoff: std::time::Duration::from_millis(100),
        },
        reconnect: ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        },
        command_timeout: std::time::Duration::from_secs(5),
        ..CdpConfig::default()
    };
    let client = Arc::new(
        CdpClient::connect(&format!("ws://{cdp_addr}"), config)
            .await
            .unwrap(),
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel(4);
    let registry = Arc::new(CommandRegistry::new(
        store,
        client,
        ProtocolSchema::load().unwrap(),
        shutdown_tx,
    ));

    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("daemon.sock");
    let server = IpcServer::bind(&sock).unwrap();
    server.spawn(registry);

    Daemonish {
        sock,
        shutdown_rx,
        _dir: dir,
    }
}

// =============================================================================
// Framing
// =============================================================================

#[tokio::test]
async fn response_session_id_echoes_request() {
    let dir = tempfile::tempdir().unwrap();
    let sock = start_stub_server(dir.path()).await;

    let request = IpcRequest::StatusRequest {
        session_id: "my-session-id".into(),
    };
    let response = ipc::client::request(&sock, &request).await.unwrap();
    assert_eq!(response.session_id, "my-session-id");
    assert_eq!(response.kind, "status_response");
    assert!(response.is_ok());
}

#[tokio::test]
async fn one_connection_carries_sequential_requests() {
    let dir = tempfile::tempdir().unwrap();
    let sock = start_stub_server(dir.path()).await;

    let stream = UnixStream::connect(&sock).await.unwrap();
    let mut stream = BufReader::new(stream);

    for i in 0..3 {
        let line = format!(r#"{{"type":"handshake_request","sessionId":"seq-{i}"}}"#);
        let response = raw_exchange(&mut stream, &line).await;
        assert_eq!(response["sessionId"], format!("seq-{i}"));
        assert_eq!(response["type"], "handshake_response");
    }
}

#[tokio::test]
async fn garbage_line_yields_unknown_session_error() {
    let dir = tempfile::tempdir().unwrap();
    let sock = start_stub_server(dir.path()).await;

    let stream = UnixStream::connect(&sock).await.unwrap();
    let mut stream = BufReader::new(stream);

    let response = raw_exchange(&mut stream, "not json at all {").await;
    assert_eq!(response["type"], "error_response");
    assert_eq!(response["sessionId"], "unknown");
    assert_eq!(response["status"], "error");

    // The connection survives the bad frame.
    let ok = raw_exchange(
        &mut stream,
        r#"{"type":"status_request","sessionId":"after-garbage"}"#,
    )
    .await;
    assert_eq!(ok["sessionId"], "after-garbage");
}

#[tokio::test]
async fn unknown_command_is_rejected_with_echoed_session() {
    let dir = tempfile::tempdir().unwrap();
    let sock = start_stub_server(dir.path()).await;

    let stream = UnixStream::connect(&sock).await.unwrap();
    let mut stream = BufReader::new(stream);

    let response = raw_exchange(
        &mut stream,
        r#"{"type":"frobnicate_request","sessionId":"u-1"}"#,
    )
    .await;
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"], "unknown command");
    assert_eq!(response["sessionId"], "u-1");
}

#[tokio::test]
async fn abrupt_client_close_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let sock = start_stub_server(dir.path()).await;

    // Connect, write half a frame, slam the connection shut.
    let mut stream = UnixStream::connect(&sock).await.unwrap();
    stream.write_all(b"{\"type\":\"handsh").await.unwrap();
    drop(stream);

    // Server keeps accepting.
    let request = IpcRequest::HandshakeRequest {
        session_id: new_session_id(),
    };
    let response = ipc::client::request(&sock, &request).await.unwrap();
    assert!(response.is_ok());
}

// =============================================================================
// Registry dispatch
// =============================================================================

#[tokio::test]
async fn handshake_reports_pid_and_protocol_version() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::HandshakeRequest {
        session_id: new_session_id(),
    };
    let data = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(data["pid"], u64::from(std::process::id()));
    assert_eq!(data["protocolVersion"], 1);
}

#[tokio::test]
async fn status_reflects_store_contents() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::StatusRequest {
        session_id: new_session_id(),
    };
    let data = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(data["target"]["url"], "https://example.com/");
    assert_eq!(data["network"]["count"], 15);
    assert_eq!(data["console"]["count"], 1);
    assert_eq!(data["activeTelemetry"], json!(["network", "console"]));
}

#[tokio::test]
async fn peek_slices_and_reports_has_more() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::PeekRequest {
        session_id: new_session_id(),
        last_n: Some(5),
        offset: Some(2),
    };
    let data = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(data["partial"], true);
    let items = data["network"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 5);
    // 15 total, offset 2 from the end: last returned item is index 12
    assert_eq!(items.last().unwrap()["requestId"], "1000.12");
    assert_eq!(data["network"]["total"], 15);
    assert_eq!(data["network"]["hasMore"], true);
    assert_eq!(data["console"]["hasMore"], false);
}

#[tokio::test]
async fn details_finds_network_by_request_id() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::DetailsRequest {
        session_id: new_session_id(),
        item_type: ipc::ItemType::Network,
        id: "1000.7".into(),
    };
    let data = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(data["item"]["url"], "https://example.com/asset/7");
}

#[tokio::test]
async fn details_misses_report_not_found() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::DetailsRequest {
        session_id: new_session_id(),
        item_type: ipc::ItemType::Console,
        id: "99".into(),
    };
    let response = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap();
    assert!(!response.is_ok());
    assert!(response.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn cdp_call_normalizes_method_casing() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::CdpCallRequest {
        session_id: new_session_id(),
        method: "page.NAVIGATE".into(),
        params: Some(json!({"url": "https://example.com"})),
    };
    let data = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    // The echo server reflects the method actually sent on the wire.
    assert_eq!(data["result"]["method"], "Page.navigate");
}

#[tokio::test]
async fn cdp_call_rejects_unknown_method() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::CdpCallRequest {
        session_id: new_session_id(),
        method: "Nope.nothing".into(),
        params: None,
    };
    let response = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap();
    assert!(!response.is_ok());
    assert!(response.error.unwrap().contains("method not found"));
}

#[tokio::test]
async fn start_session_is_refused_by_a_running_daemon() {
    let daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::StartSessionRequest {
        session_id: new_session_id(),
        url: Some("https://example.com".into()),
    };
    let response = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap();
    assert!(!response.is_ok());
    assert_eq!(
        response.error_code,
        Some(ipc::IpcErrorCode::SessionAlreadyRunning)
    );
}

#[tokio::test]
async fn stop_session_acks_then_signals_shutdown() {
    let mut daemonish = start_registry_server(seeded_store()).await;
    let request = IpcRequest::StopSessionRequest {
        session_id: new_session_id(),
        kill_chrome: true,
    };
    let data = ipc::client::request(&daemonish.sock, &request)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(data["stopping"], true);

    let reason = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        daemonish.shutdown_rx.recv(),
    )
    .await
    .expect("timed out waiting for shutdown signal")
    .expect("shutdown channel closed");
    assert_eq!(reason, ShutdownReason::StopRequested { kill_chrome: true });
}
