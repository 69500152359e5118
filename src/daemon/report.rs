//! Final telemetry output (`session.json`).
//!
//! Written atomically during shutdown, before any session files are
//! removed, so a reader of `session.json` never observes a dangling
//! session directory mid-teardown.

use serde::Serialize;

use crate::session::{SessionError, SessionPaths, atomic_write_json};
use crate::telemetry::{
    ConsoleMessageRecord, DomSnapshot, NetworkRequestRecord, TelemetryKind, TelemetryStore,
};
use crate::timefmt;

/// Output format version.
const REPORT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    version: u32,
    success: bool,
    /// Completion time, ISO 8601.
    timestamp: String,
    /// Session duration in milliseconds.
    duration: u64,
    target: ReportTarget,
    /// Always false: the persisted report is complete. Only in-memory
    /// previews (peek responses) are partial.
    partial: bool,
    data: ReportData,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct ReportTarget {
    url: String,
    title: String,
}

#[derive(Debug, Default, Serialize)]
struct ReportData {
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<Vec<NetworkRequestRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    console: Option<Vec<ConsoleMessageRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dom: Option<DomSnapshot>,
}

/// Assemble the final report from the store and an optional DOM capture.
#[must_use]
pub fn build_report(
    store: &TelemetryStore,
    dom: Option<DomSnapshot>,
    error: Option<String>,
) -> FinalReport {
    let target = store.target().map_or_else(ReportTarget::default, |t| ReportTarget {
        url: t.url.clone(),
        title: t.title.clone(),
    });

    let network = store
        .active()
        .contains(&TelemetryKind::Network)
        .then(|| store.network().items().to_vec());
    let console = store
        .active()
        .contains(&TelemetryKind::Console)
        .then(|| store.console().items().to_vec());

    FinalReport {
        version: REPORT_VERSION,
        success: error.is_none(),
        timestamp: timefmt::now_iso8601(),
        duration: store.elapsed_ms(),
        target,
        partial: false,
        data: ReportData {
            network,
            console,
            dom,
        },
        error,
    }
}

/// Write the report to `session.json` (atomic replace).
///
/// # Errors
///
/// Returns `SessionError` on serialization or filesystem failure.
pub fn write_report(paths: &SessionPaths, report: &FinalReport) -> Result<(), SessionError> {
    atomic_write_json(&paths.session_output(), report)
}
