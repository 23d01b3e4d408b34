// ABOUTME: Applies planned row changes to the destination in committed batches
// ABOUTME: Reports progress per batch and converts failures into partial-apply errors

use anyhow::Result;

use super::diff::{insert_chunk_rows, insert_statement};
use super::progress::{Phase, ProgressSink, SyncEvent};
use crate::db::{ConnectionLost, Executor, SqlValue};
use crate::error::SyncError;
use crate::utils::percent;

/// Writes batches for one destination table.
///
/// Every batch is its own unit of work: once committed it stays committed even
/// if a later batch fails.
pub struct BatchWriter<'a> {
    dest: &'a mut dyn Executor,
    table: String,
    display_name: String,
}

impl<'a> BatchWriter<'a> {
    /// `table` is the quoted `[schema].[table]`; `display_name` is used in progress events.
    pub fn new(dest: &'a mut dyn Executor, table: &str, display_name: &str) -> Self {
        Self {
            dest,
            table: table.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// Insert `rows` (laid out as `columns`) in batches of `batch_size`.
    ///
    /// Each batch runs in one transaction as a series of multi-row
    /// `INSERT … VALUES` statements sized to stay under the parameter limit.
    pub async fn insert_rows<P: ProgressSink + ?Sized>(
        &mut self,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        batch_size: usize,
        sink: &mut P,
    ) -> crate::error::Result<u64> {
        let total = rows.len() as u64;
        let mut committed = 0u64;

        for (i, batch) in rows.chunks(batch_size.max(1)).enumerate() {
            if let Err(e) = self.insert_batch(columns, batch).await {
                return Err(self.batch_error(Phase::Insert, i + 1, committed, e));
            }
            committed += batch.len() as u64;
            tracing::debug!(
                "{}: insert batch {} committed ({}/{})",
                self.display_name,
                i + 1,
                committed,
                total
            );
            self.report(sink, Phase::Insert, committed, total);
        }
        Ok(committed)
    }

    /// Run `sql` once per parameter row, committing every `batch_size` rows.
    pub async fn apply<P: ProgressSink + ?Sized>(
        &mut self,
        phase: Phase,
        sql: &str,
        rows: &[Vec<SqlValue>],
        batch_size: usize,
        sink: &mut P,
    ) -> crate::error::Result<u64> {
        let total = rows.len() as u64;
        let mut committed = 0u64;

        for (i, batch) in rows.chunks(batch_size.max(1)).enumerate() {
            if let Err(e) = self.dest.execute_batch(sql, batch, true).await {
                return Err(self.batch_error(phase, i + 1, committed, e));
            }
            committed += batch.len() as u64;
            tracing::debug!(
                "{}: {} batch {} committed ({}/{})",
                self.display_name,
                phase,
                i + 1,
                committed,
                total
            );
            self.report(sink, phase, committed, total);
        }
        Ok(committed)
    }

    async fn insert_batch(&mut self, columns: &[String], batch: &[Vec<SqlValue>]) -> Result<()> {
        self.dest.begin_transaction().await?;
        match self.insert_chunks(columns, batch).await {
            Ok(()) => self.dest.commit().await,
            Err(e) => {
                if let Err(rollback_err) = self.dest.rollback().await {
                    tracing::warn!(
                        "{}: rollback of failed insert batch also failed: {:#}",
                        self.display_name,
                        rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn insert_chunks(&mut self, columns: &[String], batch: &[Vec<SqlValue>]) -> Result<()> {
        for chunk in batch.chunks(insert_chunk_rows(columns.len())) {
            let sql = insert_statement(&self.table, columns, chunk.len());
            let params: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();
            self.dest.execute_non_query(&sql, &params, false).await?;
        }
        Ok(())
    }

    fn report<P: ProgressSink + ?Sized>(
        &self,
        sink: &mut P,
        phase: Phase,
        current: u64,
        total: u64,
    ) {
        sink.on_event(&SyncEvent::Progress {
            table: self.display_name.clone(),
            phase,
            current,
            total,
            percent: percent(current, total),
        });
    }

    fn batch_error(
        &self,
        phase: Phase,
        batch: usize,
        committed: u64,
        err: anyhow::Error,
    ) -> SyncError {
        SyncError::BatchApply {
            table: self.display_name.clone(),
            phase,
            batch,
            committed,
            connection_lost: err.downcast_ref::<ConnectionLost>().is_some(),
            message: format!("{:#}", err),
        }
    }
}
