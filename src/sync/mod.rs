// ABOUTME: Table synchronization engine: strategy selection, diffing and batch apply
// ABOUTME: Driven per table by TableSynchronizer and across tables by SyncOrchestrator

pub mod detection;
pub mod diff;
pub mod orchestrator;
pub mod progress;
pub mod table;
pub mod writer;

pub use detection::{select_strategy, ChangeDetection, ChangeDetectionStrategy};
pub use orchestrator::{RunStats, SyncOrchestrator, MAX_RECORDED_ERRORS};
pub use progress::{Phase, ProgressSink, SyncEvent, TableStatus};
pub use table::{SyncPhase, SyncStats, TableSynchronizer};
pub use writer::BatchWriter;
