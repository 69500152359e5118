//! Command registry: maps IPC requests to handlers over the daemon's
//! shared state (telemetry store, CDP client, protocol schema).

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::cdp::{CdpClient, CdpError};
use crate::ipc::{IpcErrorCode, IpcHandler, IpcRequest, IpcResponse, ItemType};
use crate::schema::ProtocolSchema;
use crate::telemetry::{SharedStore, lock_store};
use crate::timefmt;

use super::ShutdownReason;

/// IPC protocol version reported by the handshake.
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Hard cap on `peek` slice sizes.
const PEEK_MAX: usize = 100;

/// Default `peek` slice size when the client does not specify one.
const PEEK_DEFAULT: usize = 10;

/// Default number of matches returned by `dom_query`.
const DOM_QUERY_DEFAULT_LIMIT: usize = 20;

/// Shared daemon state the handlers operate on.
pub struct CommandRegistry {
    store: SharedStore,
    client: Arc<CdpClient>,
    schema: ProtocolSchema,
    /// Node ids from the most recent `dom_query`, for index-based refs.
    query_cache: Mutex<Vec<i64>>,
    shutdown_tx: mpsc::Sender<ShutdownReason>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new(
        store: SharedStore,
        client: Arc<CdpClient>,
        schema: ProtocolSchema,
        shutdown_tx: mpsc::Sender<ShutdownReason>,
    ) -> Self {
        Self {
            store,
            client,
            schema,
            query_cache: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    async fn handle_status(&self, request: &IpcRequest) -> IpcResponse {
        let data = {
            let store = lock_store(&self.store);
            let (net_newest, console_newest) = store.newest_timestamps();
            json!({
                "startTime": store.start_iso(),
                "elapsedMs": store.elapsed_ms(),
                "target": store.target().map(|t| json!({
                    "id": t.id,
                    "url": t.url,
                    "title": t.title,
                })),
                "activeTelemetry": store.active(),
                "network": {
                    "count": store.network().len(),
                    "dropped": store.network().dropped(),
                    "newestTimestamp": net_newest.map(timefmt::epoch_ms_to_iso),
                },
                "console": {
                    "count": store.console().len(),
                    "dropped": store.console().dropped(),
                    "newestTimestamp": console_newest.map(timefmt::epoch_ms_to_iso),
                },
            })
        };
        IpcResponse::ok(request, data)
    }

    async fn handle_peek(
        &self,
        request: &IpcRequest,
        last_n: Option<usize>,
        offset: Option<usize>,
    ) -> IpcResponse {
        let last_n = last_n.unwrap_or(PEEK_DEFAULT).min(PEEK_MAX);
        let offset = offset.unwrap_or(0);

        let data = {
            let store = lock_store(&self.store);
            let network = store.network().tail(last_n, offset);
            let console = store.console().tail(last_n, offset);
            let network_total = store.network().len();
            let console_total = store.console().len();
            json!({
                "partial": true,
                "network": {
                    "items": network,
                    "total": network_total,
                    "hasMore": network_total > offset + network.len(),
                },
                "console": {
                    "items": console,
                    "total": console_total,
                    "hasMore": console_total > offset + console.len(),
                },
            })
        };
        IpcResponse::ok(request, data)
    }

    async fn handle_details(
        &self,
        request: &IpcRequest,
        item_type: ItemType,
        id: &str,
    ) -> IpcResponse {
        let store = lock_store(&self.store);
        match item_type {
            ItemType::Network => match store.find_network(id) {
                Some(record) => IpcResponse::ok(request, json!({"item": record})),
                None => IpcResponse::error(request, format!("network item not found: {id}"), None),
            },
            ItemType::Console => {
                let found = id
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| store.console_at(index));
                match found {
                    Some(record) => IpcResponse::ok(request, json!({"item": record})),
                    None => {
                        IpcResponse::error(request, format!("console item not found: {id}"), None)
                    }
                }
            }
        }
    }

    async fn handle_cdp_call(
        &self,
        request: &IpcRequest,
        method: &str,
        params: Option<Value>,
    ) -> IpcResponse {
        let Some(canonical) = self.schema.normalize(method) else {
            return IpcResponse::error(request, format!("method not found: {method}"), None);
        };

        match self.client.send_command(canonical, params).await {
            Ok(result) => IpcResponse::ok(request, json!({"result": result})),
            Err(e) => cdp_error_response(request, &e),
        }
    }

    /// Resolve a `dom_get`/`dom_highlight` target: a bare integer indexes
    /// the cached `dom_query` results; anything else is a CSS selector.
    async fn resolve_node(&self, target: &str) -> Result<i64, String> {
        if let Ok(index) = target.parse::<usize>() {
            let cached = {
                let cache = self
                    .query_cache
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                cache.get(index).copied()
            };
            return cached.ok_or_else(|| {
                format!("no cached query result at index {index}; run dom query first")
            });
        }

        let root = self.document_root().await?;
        let found = self
            .client
            .send_command(
                "DOM.querySelector",
                Some(json!({"nodeId": root, "selector": target})),
            )
            .await
            .map_err(|e| e.to_string())?;
        match found["nodeId"].as_i64() {
            Some(node_id) if node_id != 0 => Ok(node_id),
            _ => Err(format!("no element matches selector: {target}")),
        }
    }

    async fn document_root(&self) -> Result<i64, String> {
        let doc = self
            .client
            .send_command("DOM.getDocument", None)
            .await
            .map_err(|e| e.to_string())?;
        doc["root"]["nodeId"]
            .as_i64()
            .ok_or_else(|| "document has no root node".to_string())
    }

    async fn handle_dom_query(
        &self,
        request: &IpcRequest,
        selector: &str,
        limit: Option<usize>,
    ) -> IpcResponse {
        let limit = limit.unwrap_or(DOM_QUERY_DEFAULT_LIMIT);

        let root = match self.document_root().await {
            Ok(root) => root,
            Err(e) => return IpcResponse::error(request, e, None),
        };

        let found = match self
            .client
            .send_command(
                "DOM.querySelectorAll",
                Some(json!({"nodeId": root, "selector": selector})),
            )
            .await
        {
            Ok(found) => found,
            Err(e) => return cdp_error_response(request, &e),
        };

        let node_ids: Vec<i64> = found["nodeIds"]
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        let mut items = Vec::new();
        for (index, node_id) in node_ids.iter().take(limit).enumerate() {
            let mut item = json!({"index": index, "nodeId": node_id});
            if let Ok(described) = self
                .client
                .send_command("DOM.describeNode", Some(json!({"nodeId": node_id})))
                .await
            {
                item["tag"] = json!(
                    described["node"]["nodeName"]
                        .as_str()
                        .unwrap_or("")
                        .to_ascii_lowercase()
                );
                item["attributes"] = attribute_map(&described["node"]["attributes"]);
            }
            items.push(item);
        }

        {
            let mut cache = self
                .query_cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *cache = node_ids.clone();
        }

        IpcResponse::ok(
            request,
            json!({"selector": selector, "count": node_ids.len(), "items": items}),
        )
    }

    async fn handle_dom_get(&self, request: &IpcRequest, target: &str) -> IpcResponse {
        let node_id = match self.resolve_node(target).await {
            Ok(node_id) => node_id,
            Err(e) => return IpcResponse::error(request, e, None),
        };
        match self
            .client
            .send_command("DOM.getOuterHTML", Some(json!({"nodeId": node_id})))
            .await
        {
            Ok(result) => IpcResponse::ok(
                request,
                json!({"nodeId": node_id, "outerHTML": result["outerHTML"]}),
            ),
            Err(e) => cdp_error_response(request, &e),
        }
    }

    async fn handle_dom_highlight(&self, request: &IpcRequest, target: &str) -> IpcResponse {
        let node_id = match self.resolve_node(target).await {
            Ok(node_id) => node_id,
            Err(e) => return IpcResponse::error(request, e, None),
        };

        if let Err(e) = self.client.send_command("Overlay.enable", None).await {
            return cdp_error_response(request, &e);
        }
        let params = json!({
            "nodeId": node_id,
            "highlightConfig": {
                "contentColor": {"r": 111, "g": 168, "b": 220, "a": 0.66},
                "paddingColor": {"r": 147, "g": 196, "b": 125, "a": 0.55},
                "borderColor": {"r": 255, "g": 229, "b": 153, "a": 0.66},
            }
        });
        match self
            .client
            .send_command("Overlay.highlightNode", Some(params))
            .await
        {
            Ok(_) => IpcResponse::ok(request, json!({"nodeId": node_id, "highlighted": true})),
            Err(e) => cdp_error_response(request, &e),
        }
    }

    async fn handle_dom_screenshot(
        &self,
        request: &IpcRequest,
        format: Option<String>,
        quality: Option<u8>,
        full_page: bool,
    ) -> IpcResponse {
        let format = format.unwrap_or_else(|| "png".to_string());
        let mut params = json!({"format": format, "captureBeyondViewport": full_page});
        if let Some(quality) = quality {
            if format == "jpeg" || format == "webp" {
                params["quality"] = json!(quality);
            }
        }

        match self
            .client
            .send_command("Page.captureScreenshot", Some(params))
            .await
        {
            Ok(result) => IpcResponse::ok(
                request,
                json!({"format": format, "data": result["data"]}),
            ),
            Err(e) => cdp_error_response(request, &e),
        }
    }

    async fn handle_stop_session(&self, request: &IpcRequest, kill_chrome: bool) -> IpcResponse {
        match self
            .shutdown_tx
            .send(ShutdownReason::StopRequested { kill_chrome })
            .await
        {
            Ok(()) => IpcResponse::ok(request, json!({"stopping": true})),
            Err(_) => IpcResponse::error(
                request,
                "daemon is already shutting down",
                Some(IpcErrorCode::DaemonError),
            ),
        }
    }
}

/// Map a CDP failure onto an IPC error response. Only timeouts carry a
/// structured code; the rest surface as short human messages.
fn cdp_error_response(request: &IpcRequest, error: &CdpError) -> IpcResponse {
    let code = match error {
        CdpError::CommandTimeout { .. } | CdpError::ConnectionTimeout => {
            Some(IpcErrorCode::CdpTimeout)
        }
        _ => None,
    };
    IpcResponse::error(request, error.to_string(), code)
}

/// Convert CDP's flat attribute array (`[name, value, ...]`) to a map.
fn attribute_map(attributes: &Value) -> Value {
    let mut map = serde_json::Map::new();
    if let Some(flat) = attributes.as_array() {
        for pair in flat.chunks(2) {
            if let [name, value] = pair {
                if let (Some(name), Some(value)) = (name.as_str(), value.as_str()) {
                    map.insert(name.to_string(), json!(value));
                }
            }
        }
    }
    Value::Object(map)
}

impl IpcHandler for CommandRegistry {
    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match &request {
            IpcRequest::HandshakeRequest { .. } => IpcResponse::ok(
                &request,
                json!({
                    "pid": std::process::id(),
                    "protocolVersion": IPC_PROTOCOL_VERSION,
                }),
            ),
            IpcRequest::StatusRequest { .. } => self.handle_status(&request).await,
            IpcRequest::PeekRequest { last_n, offset, .. } => {
                self.handle_peek(&request, *last_n, *offset).await
            }
            IpcRequest::DetailsRequest { item_type, id, .. } => {
                let (item_type, id) = (*item_type, id.clone());
                self.handle_details(&request, item_type, &id).await
            }
            IpcRequest::CdpCallRequest { method, params, .. } => {
                let (method, params) = (method.clone(), params.clone());
                self.handle_cdp_call(&request, &method, params).await
            }
            IpcRequest::DomQueryRequest {
                selector, limit, ..
            } => {
                let (selector, limit) = (selector.clone(), *limit);
                self.handle_dom_query(&request, &selector, limit).await
            }
            IpcRequest::DomGetRequest { target, .. } => {
                let target = target.clone();
                self.handle_dom_get(&request, &target).await
            }
            IpcRequest::DomHighlightRequest { target, .. } => {
                let target = target.clone();
                self.handle_dom_highlight(&request, &target).await
            }
            IpcRequest::DomScreenshotRequest {
                format,
                quality,
                full_page,
                ..
            } => {
                let (format, quality, full_page) = (format.clone(), *quality, *full_page);
                self.handle_dom_screenshot(&request, format, quality, full_page)
                    .await
            }
            IpcRequest::StartSessionRequest { .. } => IpcResponse::error(
                &request,
                "this daemon already owns a session",
                Some(IpcErrorCode::SessionAlreadyRunning),
            ),
            IpcRequest::StopSessionRequest { kill_chrome, .. } => {
                let kill_chrome = *kill_chrome;
                self.handle_stop_session(&request, kill_chrome).await
            }
        }
    }
}
