//! In-memory telemetry store shared between collector tasks and IPC
//! command handlers.
//!
//! One mutex, short critical sections: collectors append, handlers slice.
//! The rings are append-only and bounded; once full, new entries are
//! dropped (never evicting earlier traffic) and a single warning is
//! logged per ring.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::types::{
    ConsoleMessageRecord, NetworkRequestRecord, TargetSummary, TelemetryKind,
};
use crate::timefmt;

/// Capacity of each telemetry ring.
pub const RING_CAP: usize = 10_000;

/// Append-only bounded sequence with drop-new-not-evict-old semantics.
#[derive(Debug)]
pub struct BoundedRing<T> {
    items: Vec<T>,
    cap: usize,
    dropped: u64,
    warned: bool,
    label: &'static str,
}

impl<T> BoundedRing<T> {
    fn new(cap: usize, label: &'static str) -> Self {
        Self {
            items: Vec::new(),
            cap,
            dropped: 0,
            warned: false,
            label,
        }
    }

    /// Append an item, or drop it when the ring is full. Returns whether
    /// the item was stored.
    pub fn push(&mut self, item: T) -> bool {
        if self.items.len() >= self.cap {
            self.dropped += 1;
            if !self.warned {
                self.warned = true;
                tracing::warn!(
                    ring = self.label,
                    cap = self.cap,
                    "telemetry ring full, dropping new entries"
                );
            }
            return false;
        }
        self.items.push(item);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// The last `last_n` items, skipping `offset` from the end, in
    /// chronological order.
    #[must_use]
    pub fn tail(&self, last_n: usize, offset: usize) -> &[T] {
        let total = self.items.len();
        let end = total.saturating_sub(offset);
        let start = end.saturating_sub(last_n);
        &self.items[start..end]
    }
}

/// Shared handle to the telemetry store.
pub type SharedStore = Arc<Mutex<TelemetryStore>>;

/// Lock the store, recovering from a poisoned mutex. The store holds
/// plain data, so a panicking writer cannot leave it in a state worse
/// than a partially appended ring.
pub fn lock_store(store: &SharedStore) -> std::sync::MutexGuard<'_, TelemetryStore> {
    store
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Process-wide telemetry state inside the daemon.
#[derive(Debug)]
pub struct TelemetryStore {
    start_wall_ms: u64,
    start_iso: String,
    started: Instant,
    target: Option<TargetSummary>,
    active: Vec<TelemetryKind>,
    network: BoundedRing<NetworkRequestRecord>,
    console: BoundedRing<ConsoleMessageRecord>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_wall_ms: timefmt::now_epoch_ms(),
            start_iso: timefmt::now_iso8601(),
            started: Instant::now(),
            target: None,
            active: Vec::new(),
            network: BoundedRing::new(RING_CAP, "network"),
            console: BoundedRing::new(RING_CAP, "console"),
        }
    }

    #[must_use]
    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn set_target(&mut self, target: TargetSummary) {
        self.target = Some(target);
    }

    #[must_use]
    pub fn target(&self) -> Option<&TargetSummary> {
        self.target.as_ref()
    }

    pub fn set_active(&mut self, kinds: Vec<TelemetryKind>) {
        self.active = kinds;
    }

    #[must_use]
    pub fn active(&self) -> &[TelemetryKind] {
        &self.active
    }

    #[must_use]
    pub fn start_iso(&self) -> &str {
        &self.start_iso
    }

    #[must_use]
    pub fn start_wall_ms(&self) -> u64 {
        self.start_wall_ms
    }

    /// Elapsed session time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn push_network(&mut self, record: NetworkRequestRecord) -> bool {
        self.network.push(record)
    }

    pub fn push_console(&mut self, record: ConsoleMessageRecord) -> bool {
        self.console.push(record)
    }

    #[must_use]
    pub fn network(&self) -> &BoundedRing<NetworkRequestRecord> {
        &self.network
    }

    #[must_use]
    pub fn console(&self) -> &BoundedRing<ConsoleMessageRecord> {
        &self.console
    }

    /// Find a network record by its CDP request id.
    #[must_use]
    pub fn find_network(&self, request_id: &str) -> Option<&NetworkRequestRecord> {
        self.network
            .items()
            .iter()
            .find(|r| r.request_id == request_id)
    }

    /// Console record by zero-based position.
    #[must_use]
    pub fn console_at(&self, index: usize) -> Option<&ConsoleMessageRecord> {
        self.console.items().get(index)
    }

    /// Timestamp of the newest entry of each kind `(network, console)`.
    #[must_use]
    pub fn newest_timestamps(&self) -> (Option<u64>, Option<u64>) {
        (
            self.network.items().last().map(|r| r.timestamp),
            self.console.items().last().map(|r| r.timestamp),
        )
    }
}
