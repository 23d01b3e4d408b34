// ABOUTME: Synchronizes one table: mirror creation, key resolution, diff and batch apply
// ABOUTME: Records configuration, outcome and watermark in the ledger

use serde::Serialize;

use super::detection::select_strategy;
use super::diff::{
    delete_statement, key_set, max_rowversion_query, plan_deletes, plan_inserts, plan_updates,
    select_query, update_statement,
};
use super::progress::{Phase, ProgressSink};
use super::writer::BatchWriter;
use super::ChangeDetectionStrategy;
use crate::config::{SyncOptions, TableSyncConfig};
use crate::db::{Executor, RowShape, SqlValue};
use crate::error::{Result, SyncError};
use crate::ledger::{SyncLedger, SyncStatus};
use crate::schema::{self, insertable_columns, ColumnDefinition, SchemaExtractor};

/// Row counts for one table run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl SyncStats {
    fn add(&mut self, phase: Phase, rows: u64) {
        match phase {
            Phase::Insert => self.inserted += rows,
            Phase::Update => self.updated += rows,
            Phase::Delete => self.deleted += rows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    NotStarted,
    EnsuringSchema,
    DetectingPk,
    Syncing,
    Success,
    Error,
}

/// Synchronizes a single table from source to destination.
pub struct TableSynchronizer<'a> {
    source: &'a mut dyn Executor,
    dest: &'a mut dyn Executor,
    ledger: &'a SyncLedger,
    options: &'a SyncOptions,
    config: TableSyncConfig,
    phase: SyncPhase,
    config_recorded: bool,
}

impl<'a> TableSynchronizer<'a> {
    pub fn new(
        source: &'a mut dyn Executor,
        dest: &'a mut dyn Executor,
        ledger: &'a SyncLedger,
        options: &'a SyncOptions,
        config: TableSyncConfig,
    ) -> Self {
        Self {
            source,
            dest,
            ledger,
            options,
            config,
            phase: SyncPhase::NotStarted,
            config_recorded: false,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// The table configuration, including the detected key and strategy once known.
    pub fn config(&self) -> &TableSyncConfig {
        &self.config
    }

    /// Run inserts, updates and deletes, recording the outcome in the ledger.
    ///
    /// On failure the error is recorded as `ERROR` together with any rows
    /// already committed, then returned.
    pub async fn synchronize<P: ProgressSink + ?Sized>(
        &mut self,
        sink: &mut P,
    ) -> Result<SyncStats> {
        tracing::info!("Synchronizing {}", self.config.full_name());
        let mut stats = SyncStats::default();

        match self.run(&mut stats, sink).await {
            Ok(()) => {
                self.phase = SyncPhase::Success;
                tracing::info!(
                    "{}: {} inserted, {} updated, {} deleted",
                    self.config.full_name(),
                    stats.inserted,
                    stats.updated,
                    stats.deleted
                );
                Ok(stats)
            }
            Err(e) => {
                if let Some((phase, committed)) = e.committed_rows() {
                    stats.add(phase, committed);
                }
                stats.errors = 1;
                self.phase = SyncPhase::Error;
                tracing::error!("Failed to synchronize {}: {}", self.config.full_name(), e);
                self.record_failure(&stats, &e).await;
                Err(e)
            }
        }
    }

    async fn run<P: ProgressSink + ?Sized>(
        &mut self,
        stats: &mut SyncStats,
        sink: &mut P,
    ) -> Result<()> {
        self.phase = SyncPhase::EnsuringSchema;
        let object_id = self
            .source
            .get_table_object_id(&self.config.schema, &self.config.table)
            .await?
            .ok_or_else(|| SyncError::NotFound(self.config.full_name()))?;
        self.ensure_destination().await?;

        let columns = SchemaExtractor::new(&mut *self.source)
            .columns(object_id)
            .await?;
        let detection = select_strategy(&columns);
        tracing::info!(
            "{}: change detection {}{}",
            self.config.full_name(),
            detection.strategy,
            detection
                .rowversion_column
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default()
        );
        self.config.change_detection_strategy = Some(detection.strategy);
        self.config.rowversion_column = detection.rowversion_column;

        self.phase = SyncPhase::DetectingPk;
        let key_columns = self.resolve_primary_key(object_id, &columns).await?;

        self.ledger
            .upsert_config(&mut *self.dest, &self.config)
            .await?;
        self.config_recorded = true;

        self.phase = SyncPhase::Syncing;
        let watermark = self.capture_watermark().await?;
        let insertable = insertable_columns(&columns);

        stats.inserted = self.insert_missing(&key_columns, &insertable, sink).await?;
        stats.updated = self.update_changed(&key_columns, &insertable, sink).await?;
        stats.deleted = self.delete_orphans(&key_columns, sink).await?;

        self.ledger
            .update_status(
                &mut *self.dest,
                &self.config.schema,
                &self.config.table,
                SyncStatus::Success,
                stats,
                None,
            )
            .await?;
        if let Some(rowversion) = watermark {
            self.ledger
                .update_rowversion_watermark(
                    &mut *self.dest,
                    &self.config.schema,
                    &self.config.table,
                    &rowversion,
                )
                .await?;
        }
        Ok(())
    }

    /// Create the destination table as a mirror of the source if it is missing.
    async fn ensure_destination(&mut self) -> Result<()> {
        let (schema, table) = (self.config.schema.clone(), self.config.table.clone());
        if self.dest.table_exists(&schema, &table).await? {
            tracing::debug!("{} already exists at destination", self.config.full_name());
            return Ok(());
        }

        tracing::warn!(
            "{} does not exist at destination; creating mirror",
            self.config.full_name()
        );
        let definition = SchemaExtractor::new(&mut *self.source)
            .get_table_definition(&schema, &table)
            .await?;
        let statements = schema::build(&definition);

        let mirror_error = |e: anyhow::Error| match SyncError::from(e) {
            SyncError::Connection(msg) => SyncError::Connection(msg),
            other => SyncError::SchemaMirror {
                table: definition.qualified_name(),
                message: other.to_string(),
            },
        };

        self.dest.begin_transaction().await.map_err(mirror_error)?;
        for statement in &statements {
            tracing::debug!("{} DDL: {}", statement.section, statement.sql);
            if let Err(e) = self.dest.execute_non_query(&statement.sql, &[], false).await {
                if let Err(rollback_err) = self.dest.rollback().await {
                    tracing::warn!("Rollback of mirror creation failed: {:#}", rollback_err);
                }
                return Err(mirror_error(e));
            }
        }
        self.dest.commit().await.map_err(mirror_error)?;

        tracing::info!(
            "Created {} at destination ({} statements)",
            definition.qualified_name(),
            statements.len()
        );
        Ok(())
    }

    async fn resolve_primary_key(
        &mut self,
        object_id: i32,
        columns: &[ColumnDefinition],
    ) -> Result<Vec<String>> {
        if self.config.primary_key_columns.is_empty() {
            let pk = SchemaExtractor::new(&mut *self.source)
                .primary_key(object_id)
                .await?;
            let detected = pk.map(|pk| pk.column_names()).unwrap_or_default();
            if detected.is_empty() {
                return Err(SyncError::NoPrimaryKey(self.config.full_name()));
            }
            tracing::info!("{}: detected primary key {:?}", self.config.full_name(), detected);
            self.config.primary_key_columns = detected;
            self.config.pk_auto_detected = true;
        }

        if let Some(missing) = first_missing(&self.config.primary_key_columns, columns) {
            return Err(SyncError::Sync(anyhow::anyhow!(
                "Primary key column {} does not exist in {}",
                missing,
                self.config.full_name()
            )));
        }

        // key columns must exist on both sides
        let dest_id = self
            .dest
            .get_table_object_id(&self.config.schema, &self.config.table)
            .await?;
        if let Some(dest_id) = dest_id {
            let dest_columns = SchemaExtractor::new(&mut *self.dest).columns(dest_id).await?;
            if let Some(missing) = first_missing(&self.config.primary_key_columns, &dest_columns) {
                return Err(SyncError::Sync(anyhow::anyhow!(
                    "Primary key column {} does not exist in destination table {}",
                    missing,
                    self.config.full_name()
                )));
            }
        }
        Ok(self.config.primary_key_columns.clone())
    }

    /// Source `MAX(rowversion)`, read before the diff so that rows changed during
    /// the run are picked up next time.
    async fn capture_watermark(&mut self) -> Result<Option<Vec<u8>>> {
        if self.config.change_detection_strategy != Some(ChangeDetectionStrategy::Rowversion) {
            return Ok(None);
        }
        let Some(column) = self.config.rowversion_column.clone() else {
            return Ok(None);
        };
        let sql = max_rowversion_query(&self.config.full_name(), &column);
        match self.source.execute_scalar(&sql, &[]).await? {
            Some(SqlValue::Binary(bytes)) => Ok(Some(bytes)),
            _ => Ok(None),
        }
    }

    async fn insert_missing<P: ProgressSink + ?Sized>(
        &mut self,
        key_columns: &[String],
        insertable: &[String],
        sink: &mut P,
    ) -> Result<u64> {
        let table = self.config.full_name();
        if insertable.is_empty() {
            tracing::info!("{}: no insertable columns", table);
            return Ok(0);
        }

        let key_shape = RowShape::new(key_columns.to_vec());
        let dest_keys = self
            .dest
            .execute_query(&select_query(&table, &key_shape, None), &[])
            .await?;
        let dest_keys = key_set(&dest_keys, &key_shape.positions(key_columns)?);
        tracing::info!("{}: {} rows already at destination", table, dest_keys.len());

        let shape = RowShape::union(key_columns, insertable);
        let source_rows = self
            .source
            .execute_query(&select_query(&table, &shape, self.config.filter()), &[])
            .await?;
        let rows = plan_inserts(
            &source_rows,
            &dest_keys,
            &shape.positions(key_columns)?,
            &shape.positions(insertable)?,
        );
        if rows.is_empty() {
            tracing::info!("{}: nothing to insert", table);
            return Ok(0);
        }

        tracing::info!("{}: {} rows to insert", table, rows.len());
        BatchWriter::new(&mut *self.dest, &table, &self.config.display_name())
            .insert_rows(insertable, &rows, self.options.insert_batch_size, sink)
            .await
    }

    async fn update_changed<P: ProgressSink + ?Sized>(
        &mut self,
        key_columns: &[String],
        insertable: &[String],
        sink: &mut P,
    ) -> Result<u64> {
        let table = self.config.full_name();
        let compare: Vec<String> = insertable
            .iter()
            .filter(|c| !key_columns.contains(c))
            .cloned()
            .collect();
        if compare.is_empty() {
            tracing::info!("{}: no updatable columns", table);
            return Ok(0);
        }

        let shape = RowShape::union(key_columns, &compare);
        let source_rows = self
            .source
            .execute_query(&select_query(&table, &shape, self.config.filter()), &[])
            .await?;
        if source_rows.is_empty() {
            return Ok(0);
        }
        let dest_rows = self
            .dest
            .execute_query(&select_query(&table, &shape, None), &[])
            .await?;

        let rows = plan_updates(
            &source_rows,
            &dest_rows,
            &shape.positions(key_columns)?,
            &shape.positions(&compare)?,
        );
        if rows.is_empty() {
            tracing::info!("{}: nothing to update", table);
            return Ok(0);
        }

        tracing::info!("{}: {} rows to update", table, rows.len());
        let sql = update_statement(&table, &compare, key_columns);
        BatchWriter::new(&mut *self.dest, &table, &self.config.display_name())
            .apply(Phase::Update, &sql, &rows, self.options.update_batch_size, sink)
            .await
    }

    async fn delete_orphans<P: ProgressSink + ?Sized>(
        &mut self,
        key_columns: &[String],
        sink: &mut P,
    ) -> Result<u64> {
        let table = self.config.full_name();
        let shape = RowShape::new(key_columns.to_vec());
        let positions = shape.positions(key_columns)?;
        // both sides use the filter so rows outside it are never touched
        let sql = select_query(&table, &shape, self.config.filter());

        let source_rows = self.source.execute_query(&sql, &[]).await?;
        let source_keys = key_set(&source_rows, &positions);
        let dest_rows = self.dest.execute_query(&sql, &[]).await?;

        let keys = plan_deletes(&source_keys, &dest_rows, &positions);
        if keys.is_empty() {
            tracing::info!("{}: nothing to delete", table);
            return Ok(0);
        }

        tracing::info!("{}: {} rows to delete", table, keys.len());
        let sql = delete_statement(&table, key_columns);
        BatchWriter::new(&mut *self.dest, &table, &self.config.display_name())
            .apply(Phase::Delete, &sql, &keys, self.options.update_batch_size, sink)
            .await
    }

    async fn record_failure(&mut self, stats: &SyncStats, error: &SyncError) {
        if !self.config_recorded {
            if let Err(e) = self.ledger.upsert_config(&mut *self.dest, &self.config).await {
                tracing::warn!(
                    "Could not record configuration for {}: {:#}",
                    self.config.full_name(),
                    e
                );
                return;
            }
            self.config_recorded = true;
        }

        let message = error.to_string();
        if let Err(e) = self
            .ledger
            .update_status(
                &mut *self.dest,
                &self.config.schema,
                &self.config.table,
                SyncStatus::Error,
                stats,
                Some(&message),
            )
            .await
        {
            tracing::warn!(
                "Could not record failure for {}: {:#}",
                self.config.full_name(),
                e
            );
        }
    }
}

fn first_missing<'c>(keys: &'c [String], columns: &[ColumnDefinition]) -> Option<&'c String> {
    keys.iter().find(|k| !columns.iter().any(|col| &col.name == *k))
}
