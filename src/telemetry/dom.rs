//! One-shot DOM snapshot, used during shutdown and by `dom` commands.

use serde_json::json;
use tokio::time::Duration;

use crate::cdp::CdpClient;

use super::types::DomSnapshot;

/// Per-call budget; snapshot calls degrade rather than block shutdown.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Issue one snapshot call with the per-call timeout; failures and
/// timeouts collapse to `None`.
async fn call(
    client: &CdpClient,
    method: &str,
    params: Option<serde_json::Value>,
) -> Option<serde_json::Value> {
    match tokio::time::timeout(CALL_TIMEOUT, client.send_command(method, params)).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::debug!(method, error = %e, "snapshot call failed");
            None
        }
        Err(_) => {
            tracing::debug!(method, "snapshot call timed out");
            None
        }
    }
}

/// Capture the document's outer HTML, URL, and title.
///
/// Runs the fixed call sequence `Page.enable`, `DOM.enable`,
/// `DOM.getDocument`, `DOM.getOuterHTML`, `Page.getFrameTree`, and
/// finally `Runtime.evaluate` for the title. Every step is best-effort:
/// a failed call degrades that part of the snapshot to an empty string
/// instead of failing the capture.
pub async fn capture_snapshot(client: &CdpClient) -> DomSnapshot {
    let _ = call(client, "Page.enable", None).await;
    let _ = call(client, "DOM.enable", None).await;

    let mut snapshot = DomSnapshot::default();

    if let Some(doc) = call(client, "DOM.getDocument", Some(json!({"depth": -1}))).await {
        snapshot.url = doc["root"]["documentURL"].as_str().unwrap_or("").to_string();
        if let Some(node_id) = doc["root"]["nodeId"].as_i64() {
            if let Some(html) = call(
                client,
                "DOM.getOuterHTML",
                Some(json!({"nodeId": node_id})),
            )
            .await
            {
                snapshot.outer_html = html["outerHTML"].as_str().unwrap_or("").to_string();
            }
        }
    }

    // The frame tree is the URL of record when the document carries
    // none (fresh tabs, srcdoc documents).
    if let Some(tree) = call(client, "Page.getFrameTree", None).await {
        if snapshot.url.is_empty() {
            snapshot.url = tree["frameTree"]["frame"]["url"]
                .as_str()
                .unwrap_or("")
                .to_string();
        }
    }

    if let Some(eval) = call(
        client,
        "Runtime.evaluate",
        Some(json!({"expression": "document.title", "returnByValue": true})),
    )
    .await
    {
        snapshot.title = eval["result"]["value"].as_str().unwrap_or("").to_string();
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{CdpConfig, ConnectConfig, ReconnectConfig};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    /// Mock CDP endpoint that answers each method from `respond` (error
    /// response when absent) and records the methods it saw.
    async fn start_snapshot_server(
        respond: fn(&str) -> Option<Value>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(Message::Text(text))) = source.next().await {
                    let cmd: Value = serde_json::from_str(&text).unwrap();
                    let method = cmd["method"].as_str().unwrap_or("").to_string();
                    let _ = seen_tx.send(method.clone());

                    let response = match respond(&method) {
                        Some(result) => serde_json::json!({"id": cmd["id"], "result": result}),
                        None => serde_json::json!({
                            "id": cmd["id"],
                            "error": {"code": -32000, "message": "unavailable"}
                        }),
                    };
                    let _ = sink.send(Message::Text(response.to_string().into())).await;
                }
            }
        });

        (format!("ws://{addr}"), seen_rx)
    }

    async fn connect(url: &str) -> CdpClient {
        let config = CdpConfig {
            connect: ConnectConfig {
                timeout: Duration::from_secs(5),
                max_attempts: 1,
                max_backoff: Duration::from_millis(100),
            },
            reconnect: ReconnectConfig {
                enabled: false,
                ..ReconnectConfig::default()
            },
            command_timeout: Duration::from_secs(5),
            ..CdpConfig::default()
        };
        CdpClient::connect(url, config).await.unwrap()
    }

    fn drain(seen: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut methods = Vec::new();
        while let Ok(method) = seen.try_recv() {
            methods.push(method);
        }
        methods
    }

    fn healthy_responses(method: &str) -> Option<Value> {
        match method {
            "Page.enable" | "DOM.enable" => Some(serde_json::json!({})),
            "DOM.getDocument" => Some(serde_json::json!({
                "root": {"nodeId": 1, "documentURL": "https://example.com/"}
            })),
            "DOM.getOuterHTML" => Some(serde_json::json!({
                "outerHTML": "<html><body>hi</body></html>"
            })),
            "Page.getFrameTree" => Some(serde_json::json!({
                "frameTree": {"frame": {"url": "https://example.com/"}}
            })),
            "Runtime.evaluate" => Some(serde_json::json!({
                "result": {"type": "string", "value": "Example Domain"}
            })),
            _ => None,
        }
    }

    #[tokio::test]
    async fn captures_url_html_and_title() {
        let (url, mut seen) = start_snapshot_server(healthy_responses).await;
        let client = connect(&url).await;

        let snapshot = capture_snapshot(&client).await;
        assert_eq!(snapshot.url, "https://example.com/");
        assert_eq!(snapshot.outer_html, "<html><body>hi</body></html>");
        assert_eq!(snapshot.title, "Example Domain");

        let methods = drain(&mut seen);
        assert_eq!(
            methods,
            vec![
                "Page.enable",
                "DOM.enable",
                "DOM.getDocument",
                "DOM.getOuterHTML",
                "Page.getFrameTree",
                "Runtime.evaluate",
            ],
            "the full call sequence runs even when nothing degrades"
        );
    }

    #[tokio::test]
    async fn degrades_to_empty_when_every_call_fails() {
        let (url, _seen) = start_snapshot_server(|_| None).await;
        let client = connect(&url).await;

        let snapshot = capture_snapshot(&client).await;
        assert_eq!(snapshot.url, "");
        assert_eq!(snapshot.title, "");
        assert_eq!(snapshot.outer_html, "");
    }

    #[tokio::test]
    async fn frame_tree_supplies_url_when_document_has_none() {
        fn responses(method: &str) -> Option<Value> {
            match method {
                "DOM.getDocument" => None,
                "Page.getFrameTree" => Some(serde_json::json!({
                    "frameTree": {"frame": {"url": "about:srcdoc"}}
                })),
                other => healthy_responses(other),
            }
        }
        let (url, _seen) = start_snapshot_server(responses).await;
        let client = connect(&url).await;

        let snapshot = capture_snapshot(&client).await;
        assert_eq!(snapshot.url, "about:srcdoc");
        assert_eq!(snapshot.outer_html, "", "no document, no HTML");
        assert_eq!(snapshot.title, "Example Domain");
    }

    #[tokio::test]
    async fn title_degrades_independently() {
        fn responses(method: &str) -> Option<Value> {
            match method {
                "Runtime.evaluate" => None,
                other => healthy_responses(other),
            }
        }
        let (url, _seen) = start_snapshot_server(responses).await;
        let client = connect(&url).await;

        let snapshot = capture_snapshot(&client).await;
        assert_eq!(snapshot.url, "https://example.com/");
        assert_eq!(snapshot.title, "");
    }
}
