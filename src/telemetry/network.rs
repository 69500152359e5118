//! Network telemetry collector.
//!
//! Subscribes to the `Network.*` event stream on the session tab and
//! assembles per-request records: in-flight state accumulates across
//! `requestWillBeSent`/`responseReceived`, and the terminal
//! `loadingFinished`/`loadingFailed` event moves the record (after
//! filtering and an optional body fetch) into the bounded output ring.
//!
//! All state lives on one dispatch task; the in-flight map needs no
//! locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::cdp::{CdpClient, CdpError};
use crate::timefmt;

use super::filters::{DEFAULT_MAX_BODY_SIZE, UrlPatterns, should_fetch_body};
use super::store::{SharedStore, lock_store};
use super::types::NetworkRequestRecord;

/// Cap on simultaneously tracked in-flight requests.
const MAX_IN_FLIGHT: usize = 10_000;

/// In-flight entries older than this are abandoned: Chrome sometimes
/// omits terminal events for cancelled requests.
const STALE_AFTER: Duration = Duration::from_secs(60);

/// How often the in-flight map is swept for stale entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Status sentinel recorded for requests that failed before a response.
const FAILED_STATUS: u16 = 0;

/// Capture configuration for the network collector.
#[derive(Debug)]
pub struct NetworkCaptureOptions {
    /// Keep requests to built-in tracking domains.
    pub include_all: bool,
    /// User-supplied URL wildcard patterns.
    pub patterns: UrlPatterns,
    /// Fetch every eligible response body.
    pub fetch_all_bodies: bool,
    /// Body size cap in bytes.
    pub max_body_size: u64,
}

impl Default for NetworkCaptureOptions {
    fn default() -> Self {
        Self {
            include_all: false,
            patterns: UrlPatterns::default(),
            fetch_all_bodies: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Per-request state held between `requestWillBeSent` and the terminal
/// event.
#[derive(Debug)]
struct InFlight {
    url: String,
    method: String,
    timestamp: u64,
    inserted: Instant,
    request_headers: Option<Value>,
    status: Option<u16>,
    mime_type: Option<String>,
    response_headers: Option<Value>,
}

/// A record ready for the ring, plus the body-fetch decision made for it.
#[derive(Debug)]
struct Terminal {
    record: NetworkRequestRecord,
    fetch_body: bool,
}

/// Event-processing core of the collector, separated from the socket
/// plumbing for testability.
struct NetworkState {
    in_flight: HashMap<String, InFlight>,
    opts: NetworkCaptureOptions,
    overflow_warned: bool,
    abandoned: u64,
}

impl NetworkState {
    fn new(opts: NetworkCaptureOptions) -> Self {
        Self {
            in_flight: HashMap::new(),
            opts,
            overflow_warned: false,
            abandoned: 0,
        }
    }

    fn on_request_will_be_sent(&mut self, params: &Value, now_ms: u64) {
        let Some(request_id) = params["requestId"].as_str() else {
            return;
        };
        if self.in_flight.len() >= MAX_IN_FLIGHT && !self.in_flight.contains_key(request_id) {
            if !self.overflow_warned {
                self.overflow_warned = true;
                tracing::warn!(cap = MAX_IN_FLIGHT, "in-flight request map full, dropping");
            }
            return;
        }

        let entry = InFlight {
            url: params["request"]["url"].as_str().unwrap_or("").to_string(),
            method: params["request"]["method"]
                .as_str()
                .unwrap_or("GET")
                .to_string(),
            timestamp: now_ms,
            inserted: Instant::now(),
            request_headers: non_null(&params["request"]["headers"]),
            status: None,
            mime_type: None,
            response_headers: None,
        };
        self.in_flight.insert(request_id.to_string(), entry);
    }

    fn on_response_received(&mut self, params: &Value) {
        let Some(request_id) = params["requestId"].as_str() else {
            return;
        };
        if let Some(entry) = self.in_flight.get_mut(request_id) {
            #[allow(clippy::cast_possible_truncation)]
            let status = params["response"]["status"].as_u64().map(|s| s as u16);
            entry.status = status;
            entry.mime_type = params["response"]["mimeType"].as_str().map(String::from);
            entry.response_headers = non_null(&params["response"]["headers"]);
        }
    }

    fn on_loading_finished(&mut self, params: &Value) -> Option<Terminal> {
        let request_id = params["requestId"].as_str()?;
        let entry = self.in_flight.remove(request_id)?;
        if !self
            .opts
            .patterns
            .keep_url(&entry.url, self.opts.include_all)
        {
            return None;
        }

        let size = params["encodedDataLength"].as_u64();
        let fetch_body = should_fetch_body(
            &self.opts.patterns,
            &entry.url,
            entry.mime_type.as_deref(),
            size,
            self.opts.fetch_all_bodies,
            self.opts.max_body_size,
        );

        Some(Terminal {
            record: finish_record(request_id, entry, false),
            fetch_body,
        })
    }

    fn on_loading_failed(&mut self, params: &Value) -> Option<NetworkRequestRecord> {
        let request_id = params["requestId"].as_str()?;
        let mut entry = self.in_flight.remove(request_id)?;
        if !self
            .opts
            .patterns
            .keep_url(&entry.url, self.opts.include_all)
        {
            return None;
        }
        entry.status = Some(FAILED_STATUS);
        Some(finish_record(request_id, entry, true))
    }

    /// Remove in-flight entries older than `max_age`; they are counted
    /// but never appended to the ring.
    fn sweep_stale(&mut self, max_age: Duration) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|_, e| e.inserted.elapsed() < max_age);
        let removed = before - self.in_flight.len();
        self.abandoned += removed as u64;
        removed
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

fn non_null(value: &Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value.clone())
    }
}

fn finish_record(request_id: &str, entry: InFlight, failed: bool) -> NetworkRequestRecord {
    NetworkRequestRecord {
        request_id: request_id.to_string(),
        url: entry.url,
        method: entry.method,
        timestamp: entry.timestamp,
        request_headers: entry.request_headers,
        status: entry.status,
        mime_type: entry.mime_type,
        response_headers: entry.response_headers,
        response_body: None,
        failed,
    }
}

/// Enable the `Network` domain, subscribe to its event stream, and spawn
/// the collector task.
///
/// # Errors
///
/// Returns `CdpError` when `Network.enable` or a subscription fails.
pub async fn spawn_network_collector(
    client: Arc<CdpClient>,
    store: SharedStore,
    opts: NetworkCaptureOptions,
) -> Result<JoinHandle<()>, CdpError> {
    client.send_command("Network.enable", None).await?;

    let mut request_rx = client.subscribe("Network.requestWillBeSent").await?;
    let mut response_rx = client.subscribe("Network.responseReceived").await?;
    let mut finished_rx = client.subscribe("Network.loadingFinished").await?;
    let mut failed_rx = client.subscribe("Network.loadingFailed").await?;

    Ok(tokio::spawn(async move {
        let mut state = NetworkState::new(opts);
        let mut sweep = tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                ev = request_rx.recv() => {
                    match ev {
                        Some(ev) => state.on_request_will_be_sent(&ev.params, timefmt::now_epoch_ms()),
                        None => break,
                    }
                }
                ev = response_rx.recv() => {
                    match ev {
                        Some(ev) => state.on_response_received(&ev.params),
                        None => break,
                    }
                }
                ev = finished_rx.recv() => {
                    match ev {
                        Some(ev) => {
                            if let Some(terminal) = state.on_loading_finished(&ev.params) {
                                let mut record = terminal.record;
                                if terminal.fetch_body {
                                    fetch_body(&client, &mut record).await;
                                }
                                lock_store(&store).push_network(record);
                            }
                        }
                        None => break,
                    }
                }
                ev = failed_rx.recv() => {
                    match ev {
                        Some(ev) => {
                            if let Some(record) = state.on_loading_failed(&ev.params) {
                                lock_store(&store).push_network(record);
                            }
                        }
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    let removed = state.sweep_stale(STALE_AFTER);
                    if removed > 0 {
                        tracing::info!(removed, "abandoned stale in-flight requests");
                    }
                }
            }
        }
        tracing::debug!(abandoned = state.abandoned, "network collector stopped");
    }))
}

/// Fetch the response body for a completed request. Failures leave the
/// body absent; Chrome drops bodies for redirects and evicted cache
/// entries, which is routine.
async fn fetch_body(client: &CdpClient, record: &mut NetworkRequestRecord) {
    let params = serde_json::json!({ "requestId": record.request_id });
    match client
        .send_command("Network.getResponseBody", Some(params))
        .await
    {
        Ok(result) => {
            if result["base64Encoded"].as_bool().unwrap_or(false) {
                // Binary payload made it past the MIME filters; leave it out.
                return;
            }
            record.response_body = result["body"].as_str().map(String::from);
        }
        Err(e) => {
            tracing::debug!(request_id = %record.request_id, error = %e, "body fetch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_event(id: &str, url: &str) -> Value {
        json!({
            "requestId": id,
            "request": {
                "url": url,
                "method": "GET",
                "headers": {"Accept": "*/*"}
            },
            "timestamp": 123.0,
            "type": "XHR"
        })
    }

    fn response_event(id: &str, status: u16, mime: &str) -> Value {
        json!({
            "requestId": id,
            "response": {
                "status": status,
                "mimeType": mime,
                "headers": {"Content-Type": mime}
            }
        })
    }

    fn finished_event(id: &str, size: u64) -> Value {
        json!({"requestId": id, "encodedDataLength": size, "timestamp": 125.0})
    }

    fn state() -> NetworkState {
        NetworkState::new(NetworkCaptureOptions::default())
    }

    #[test]
    fn full_lifecycle_produces_a_completed_record() {
        let mut s = state();
        s.on_request_will_be_sent(&request_event("r1", "https://example.com/api"), 1_000);
        s.on_response_received(&response_event("r1", 200, "application/json"));
        let terminal = s.on_loading_finished(&finished_event("r1", 512)).unwrap();

        assert_eq!(terminal.record.request_id, "r1");
        assert_eq!(terminal.record.status, Some(200));
        assert_eq!(terminal.record.mime_type.as_deref(), Some("application/json"));
        assert_eq!(terminal.record.timestamp, 1_000);
        assert!(!terminal.record.failed);
        assert!(terminal.fetch_body, "json body should be fetched");
        assert_eq!(s.in_flight_len(), 0, "terminal event clears in-flight state");
    }

    #[test]
    fn css_response_skips_body_fetch() {
        let mut s = state();
        s.on_request_will_be_sent(&request_event("r1", "http://x/y.css?q=1"), 0);
        s.on_response_received(&response_event("r1", 200, "text/css"));
        let terminal = s.on_loading_finished(&finished_event("r1", 100)).unwrap();
        assert!(!terminal.fetch_body);
    }

    #[test]
    fn failed_request_gets_sentinel_status() {
        let mut s = state();
        s.on_request_will_be_sent(&request_event("r2", "https://example.com/x"), 5);
        let record = s
            .on_loading_failed(&json!({"requestId": "r2", "errorText": "net::ERR_FAILED"}))
            .unwrap();
        assert_eq!(record.status, Some(0));
        assert!(record.failed);
    }

    #[test]
    fn filtered_url_is_dropped_at_terminal_event() {
        let mut s = state();
        s.on_request_will_be_sent(
            &request_event("r3", "https://www.google-analytics.com/collect"),
            0,
        );
        assert!(s.on_loading_finished(&finished_event("r3", 10)).is_none());
        assert_eq!(s.in_flight_len(), 0);
    }

    #[test]
    fn terminal_event_for_unknown_request_is_ignored() {
        let mut s = state();
        assert!(s.on_loading_finished(&finished_event("ghost", 1)).is_none());
        assert!(s.on_loading_failed(&json!({"requestId": "ghost"})).is_none());
    }

    #[test]
    fn duplicate_terminal_event_finds_nothing() {
        let mut s = state();
        s.on_request_will_be_sent(&request_event("r4", "https://example.com/a"), 0);
        assert!(s.on_loading_finished(&finished_event("r4", 1)).is_some());
        assert!(s.on_loading_finished(&finished_event("r4", 1)).is_none());
    }

    #[test]
    fn sweep_abandons_only_old_entries() {
        let mut s = state();
        s.on_request_will_be_sent(&request_event("young", "https://example.com/y"), 0);
        let removed = s.sweep_stale(Duration::from_secs(60));
        assert_eq!(removed, 0);
        let removed = s.sweep_stale(Duration::ZERO);
        assert_eq!(removed, 1);
        assert_eq!(s.in_flight_len(), 0);
        // Abandoned entries never reach the ring
        assert!(s.on_loading_finished(&finished_event("young", 1)).is_none());
    }

    #[test]
    fn in_flight_overflow_drops_new_requests() {
        let mut s = state();
        for i in 0..MAX_IN_FLIGHT {
            s.on_request_will_be_sent(&request_event(&format!("r{i}"), "https://example.com/"), 0);
        }
        assert_eq!(s.in_flight_len(), MAX_IN_FLIGHT);
        s.on_request_will_be_sent(&request_event("overflow", "https://example.com/"), 0);
        assert_eq!(s.in_flight_len(), MAX_IN_FLIGHT);
        assert!(s.on_loading_finished(&finished_event("overflow", 1)).is_none());
    }

    #[test]
    fn event_without_request_id_is_ignored() {
        let mut s = state();
        s.on_request_will_be_sent(&json!({"request": {"url": "https://x"}}), 0);
        assert_eq!(s.in_flight_len(), 0);
    }
}
