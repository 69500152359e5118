//! `bdg tail` — follow new telemetry, one JSON line per item.

use std::io::Write;
use std::time::Duration;

use bdg::error::{AppError, ExitCode};
use bdg::ipc::{IpcRequest, new_session_id};

use crate::cli::{GlobalOpts, TailArgs};
use crate::support::{request_daemon, resolve_paths};

/// Largest slice the daemon will hand back per poll.
const POLL_WINDOW: usize = 100;

/// Totals observed on the previous poll; new items are everything past
/// them.
#[derive(Default)]
struct Cursor {
    network_total: usize,
    console_total: usize,
    primed: bool,
}

impl Cursor {
    /// Emit items that arrived since the last poll and advance. The
    /// first poll only primes the cursor so old traffic is not replayed.
    fn advance(&mut self, data: &serde_json::Value) {
        let network_total = data["network"]["total"].as_u64().unwrap_or(0) as usize;
        let console_total = data["console"]["total"].as_u64().unwrap_or(0) as usize;

        if self.primed {
            emit_new(&data["network"]["items"], network_total - self.network_total.min(network_total), "network");
            emit_new(&data["console"]["items"], console_total - self.console_total.min(console_total), "console");
        }

        self.network_total = network_total;
        self.console_total = console_total;
        self.primed = true;
    }
}

/// Print the last `fresh` entries of `items` as JSON lines tagged with
/// their kind.
fn emit_new(items: &serde_json::Value, fresh: usize, kind: &str) {
    let Some(items) = items.as_array() else { return };
    let fresh = fresh.min(items.len());
    for item in &items[items.len() - fresh..] {
        let mut line = item.clone();
        line["kind"] = serde_json::json!(kind);
        println!("{line}");
    }
    if fresh > 0 {
        let _ = std::io::stdout().flush();
    }
}

pub async fn execute_tail(global: &GlobalOpts, args: &TailArgs) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;
    let interval = Duration::from_millis(args.interval.max(100));
    let deadline = args
        .timeout
        .map(|t| tokio::time::Instant::now() + Duration::from_millis(t));

    let mut cursor = Cursor::default();

    loop {
        let request = IpcRequest::PeekRequest {
            session_id: new_session_id(),
            last_n: Some(POLL_WINDOW),
            offset: Some(0),
        };
        match request_daemon(&paths, &request).await {
            Ok(data) => cursor.advance(&data),
            Err(e) if e.code == ExitCode::ResourceNotFound => {
                if !cursor.primed {
                    return Err(e);
                }
                // Session ended while following; stop quietly.
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let sleep_until_deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = sleep_until_deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peek_payload(network_total: usize, urls: &[&str]) -> serde_json::Value {
        json!({
            "network": {
                "items": urls
                    .iter()
                    .map(|u| json!({"url": u, "method": "GET"}))
                    .collect::<Vec<_>>(),
                "total": network_total,
                "hasMore": false,
            },
            "console": {"items": [], "total": 0, "hasMore": false},
        })
    }

    #[test]
    fn first_poll_primes_without_emitting() {
        let mut cursor = Cursor::default();
        cursor.advance(&peek_payload(5, &["a", "b"]));
        assert!(cursor.primed);
        assert_eq!(cursor.network_total, 5);
    }

    #[test]
    fn totals_advance_monotonically() {
        let mut cursor = Cursor::default();
        cursor.advance(&peek_payload(5, &[]));
        cursor.advance(&peek_payload(8, &["x", "y", "z"]));
        assert_eq!(cursor.network_total, 8);
    }
}
