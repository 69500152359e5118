//! Telemetry collection: the shared store, the network and console
//! collectors, filtering, and the DOM snapshot.

mod console;
mod dom;
mod filters;
mod network;
mod store;
mod types;

pub use console::{ConsoleCaptureOptions, spawn_console_collector};
pub use dom::capture_snapshot;
pub use filters::{
    ConsoleFilters, DEFAULT_MAX_BODY_SIZE, FilterError, UrlPatterns, is_tracking_url,
    should_fetch_body,
};
pub use network::{NetworkCaptureOptions, spawn_network_collector};
pub use store::{BoundedRing, RING_CAP, SharedStore, TelemetryStore, lock_store};
pub use types::{
    ConsoleMessageRecord, DomSnapshot, NetworkRequestRecord, TargetSummary, TelemetryKind,
};
