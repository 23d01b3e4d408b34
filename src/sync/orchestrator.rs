// ABOUTME: Runs the table synchronizer over every selected table, one at a time
// ABOUTME: Aggregates totals and isolates per-table failures

use serde::Serialize;

use super::progress::{ProgressSink, SyncEvent, TableStatus};
use super::table::TableSynchronizer;
use crate::config::{SyncOptions, TableSyncConfig};
use crate::db::Executor;
use crate::error::SyncError;
use crate::ledger::SyncLedger;

/// Recorded error messages per run; the rest are only counted.
pub const MAX_RECORDED_ERRORS: usize = 100;

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub tables_attempted: usize,
    pub tables_succeeded: usize,
    pub tables_failed: usize,
    pub total_inserted: u64,
    pub total_updated: u64,
    pub total_deleted: u64,
    /// `schema.table: message`, at most [`MAX_RECORDED_ERRORS`] entries.
    pub errors: Vec<String>,
    pub errors_truncated: usize,
    /// Set when a connection failure stopped the run before every table was processed.
    pub aborted: bool,
}

impl RunStats {
    pub fn has_failures(&self) -> bool {
        self.tables_failed > 0 || self.aborted
    }

    fn record_error(&mut self, message: String) {
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(message);
        } else {
            self.errors_truncated += 1;
        }
    }
}

/// Drives a whole run over one source and one destination connection.
pub struct SyncOrchestrator<'a> {
    source: &'a mut dyn Executor,
    dest: &'a mut dyn Executor,
    ledger: SyncLedger,
    options: SyncOptions,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        source: &'a mut dyn Executor,
        dest: &'a mut dyn Executor,
        ledger: SyncLedger,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            dest,
            ledger,
            options,
        }
    }

    /// Synchronize every table that is both selected and enabled, in order.
    ///
    /// Never fails: table errors are recorded in the returned stats and the run
    /// continues, except for connection failures which stop it.
    pub async fn run<P: ProgressSink + ?Sized>(
        &mut self,
        tables: &[TableSyncConfig],
        sink: &mut P,
    ) -> RunStats {
        let mut run = RunStats::default();

        if let Err(e) = self.ledger.ensure_table(&mut *self.dest).await {
            let e = SyncError::from(e);
            tracing::error!("Cannot prepare the sync ledger: {}", e);
            run.record_error(format!("{}: {}", self.ledger.table_name(), e));
            run.aborted = true;
            return run;
        }

        let runnable: Vec<&TableSyncConfig> = tables.iter().filter(|t| t.is_runnable()).collect();
        let total = runnable.len();
        tracing::info!("Synchronizing {} of {} configured tables", total, tables.len());

        for (i, config) in runnable.into_iter().enumerate() {
            let name = config.display_name();
            run.tables_attempted += 1;
            sink.on_event(&SyncEvent::TableStatus {
                table: name.clone(),
                index: i + 1,
                total,
                status: TableStatus::Syncing,
            });

            let result = TableSynchronizer::new(
                &mut *self.source,
                &mut *self.dest,
                &self.ledger,
                &self.options,
                config.clone(),
            )
            .synchronize(sink)
            .await;

            let status = match result {
                Ok(stats) => {
                    run.tables_succeeded += 1;
                    run.total_inserted += stats.inserted;
                    run.total_updated += stats.updated;
                    run.total_deleted += stats.deleted;
                    TableStatus::Success
                }
                Err(e) => {
                    run.tables_failed += 1;
                    run.record_error(format!("{}: {}", name, e));
                    if e.is_fatal_to_run() {
                        run.aborted = true;
                    }
                    TableStatus::Error
                }
            };

            sink.on_event(&SyncEvent::TableStatus {
                table: name.clone(),
                index: i + 1,
                total,
                status,
            });

            if run.aborted {
                tracing::error!(
                    "Stopping after {}: connection lost ({} tables not processed)",
                    name,
                    total - (i + 1)
                );
                break;
            }
        }

        tracing::info!(
            "Run finished: {} succeeded, {} failed, {} inserted, {} updated, {} deleted",
            run.tables_succeeded,
            run.tables_failed,
            run.total_inserted,
            run.total_updated,
            run.total_deleted
        );
        run
    }
}
