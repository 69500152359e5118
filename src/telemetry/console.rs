//! Console telemetry collector.
//!
//! Subscribes to `Runtime.consoleAPICalled` and `Runtime.exceptionThrown`
//! on the session tab, coerces arguments to text, applies the console
//! filters, and appends to the bounded ring.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::cdp::{CdpClient, CdpError};
use crate::timefmt;

use super::filters::ConsoleFilters;
use super::store::{SharedStore, lock_store};
use super::types::ConsoleMessageRecord;

/// Placeholder for arguments with no primitive value or description.
const OPAQUE_ARG: &str = "[object]";

/// Capture configuration for the console collector.
#[derive(Debug, Default)]
pub struct ConsoleCaptureOptions {
    pub filters: ConsoleFilters,
}

/// Coerce a single CDP `RemoteObject` argument to text: primitives by
/// value, everything else by description, opaque otherwise.
fn coerce_arg(arg: &Value) -> String {
    match &arg["value"] {
        Value::String(s) => s.clone(),
        Value::Null => {
            if arg["type"].as_str() == Some("undefined") {
                "undefined".to_string()
            } else if let Some(desc) = arg["description"].as_str() {
                desc.to_string()
            } else if arg["type"].as_str() == Some("object") && arg["subtype"].as_str() == Some("null") {
                "null".to_string()
            } else {
                OPAQUE_ARG.to_string()
            }
        }
        other => serde_json::to_string(other).unwrap_or_else(|_| OPAQUE_ARG.to_string()),
    }
}

/// Build a console record from a `Runtime.consoleAPICalled` event.
fn console_api_record(params: &Value, now_ms: u64) -> ConsoleMessageRecord {
    let msg_type = params["type"].as_str().unwrap_or("log").to_string();
    let args: Vec<String> = params["args"]
        .as_array()
        .map(|list| list.iter().map(coerce_arg).collect())
        .unwrap_or_default();
    let text = args.join(" ");
    ConsoleMessageRecord {
        msg_type,
        text,
        timestamp: now_ms,
        args: if args.len() > 1 { Some(args) } else { None },
    }
}

/// Build an `error` record from a `Runtime.exceptionThrown` event.
fn exception_record(params: &Value, now_ms: u64) -> ConsoleMessageRecord {
    let details = &params["exceptionDetails"];
    let text = details["exception"]["description"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("Uncaught exception")
        .to_string();
    ConsoleMessageRecord {
        msg_type: "error".to_string(),
        text,
        timestamp: now_ms,
        args: None,
    }
}

/// Enable the `Runtime` and `Log` domains, subscribe, and spawn the
/// collector task.
///
/// # Errors
///
/// Returns `CdpError` when a domain enable or subscription fails.
pub async fn spawn_console_collector(
    client: Arc<CdpClient>,
    store: SharedStore,
    opts: ConsoleCaptureOptions,
) -> Result<JoinHandle<()>, CdpError> {
    client.send_command("Runtime.enable", None).await?;
    client.send_command("Log.enable", None).await?;

    let mut console_rx = client.subscribe("Runtime.consoleAPICalled").await?;
    let mut exception_rx = client.subscribe("Runtime.exceptionThrown").await?;

    Ok(tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                ev = console_rx.recv() => {
                    match ev {
                        Some(ev) => console_api_record(&ev.params, timefmt::now_epoch_ms()),
                        None => break,
                    }
                }
                ev = exception_rx.recv() => {
                    match ev {
                        Some(ev) => exception_record(&ev.params, timefmt::now_epoch_ms()),
                        None => break,
                    }
                }
            };

            if opts.filters.keep_message(&record.text) {
                lock_store(&store).push_console(record);
            }
        }
        tracing::debug!("console collector stopped");
    }))
}
