// ABOUTME: Progress events emitted while tables are synchronized
// ABOUTME: Per-table status changes and per-batch row progress share one sink

use std::fmt;

use serde::Serialize;

/// The three data-changing phases of a table sync, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Insert => "insert",
            Phase::Update => "update",
            Phase::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TableStatus {
    Syncing,
    Success,
    Error,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Syncing => "SYNCING",
            TableStatus::Success => "SUCCESS",
            TableStatus::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncEvent {
    /// A table started or finished. `index` is 1-based among the tables being processed.
    TableStatus {
        table: String,
        index: usize,
        total: usize,
        status: TableStatus,
    },
    /// A batch was committed.
    Progress {
        table: String,
        phase: Phase,
        current: u64,
        total: u64,
        percent: u8,
    },
}

impl SyncEvent {
    /// `PROGRESS` for batch events, otherwise the table status.
    pub fn phase_marker(&self) -> &'static str {
        match self {
            SyncEvent::TableStatus { status, .. } => status.as_str(),
            SyncEvent::Progress { .. } => "PROGRESS",
        }
    }
}

/// Receives progress events. Implementations must not block for long; they run
/// inline between batches.
pub trait ProgressSink {
    fn on_event(&mut self, event: &SyncEvent);
}

/// Discards every event.
impl ProgressSink for () {
    fn on_event(&mut self, _event: &SyncEvent) {}
}

/// Collects events, mostly useful in tests.
impl ProgressSink for Vec<SyncEvent> {
    fn on_event(&mut self, event: &SyncEvent) {
        self.push(event.clone());
    }
}
