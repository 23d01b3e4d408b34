// ABOUTME: Persisted sync metadata ledger stored in the destination database
// ABOUTME: One row per tracked table with configuration, status, counters and watermarks

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::{LedgerConfig, TableSyncConfig};
use crate::db::{Executor, Row, SqlValue};
use crate::sync::SyncStats;
use crate::utils::{qualified_name, quote_literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Error => "ERROR",
        }
    }
}

/// A full ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMetadata {
    pub id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub primary_key_columns: Option<String>,
    pub pk_auto_detected: bool,
    pub where_clause: Option<String>,
    pub change_detection_strategy: Option<String>,
    pub rowversion_column: Option<String>,
    pub last_rowversion_synced: Option<Vec<u8>>,
    pub last_hash_synced: Option<String>,
    pub last_sync_date: Option<NaiveDateTime>,
    pub last_sync_status: Option<String>,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub records_deleted: i64,
    pub last_error_message: Option<String>,
    pub last_error_date: Option<NaiveDateTime>,
    pub created_date: Option<NaiveDateTime>,
    pub modified_date: Option<NaiveDateTime>,
}

impl SyncMetadata {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64(0)?,
            schema_name: row.get_string(1)?,
            table_name: row.get_string(2)?,
            primary_key_columns: row.get_opt_string(3)?,
            pk_auto_detected: row.get_bool(4)?,
            where_clause: row.get_opt_string(5)?,
            change_detection_strategy: row.get_opt_string(6)?,
            rowversion_column: row.get_opt_string(7)?,
            last_rowversion_synced: row.get_opt_binary(8)?,
            last_hash_synced: row.get_opt_string(9)?,
            last_sync_date: row.get_opt_datetime(10)?,
            last_sync_status: row.get_opt_string(11)?,
            records_inserted: row.get_opt_i64(12)?.unwrap_or(0),
            records_updated: row.get_opt_i64(13)?.unwrap_or(0),
            records_deleted: row.get_opt_i64(14)?.unwrap_or(0),
            last_error_message: row.get_opt_string(15)?,
            last_error_date: row.get_opt_datetime(16)?,
            created_date: row.get_opt_datetime(17)?,
            modified_date: row.get_opt_datetime(18)?,
        })
    }

    /// Configured key columns, split back out of the comma-joined column.
    pub fn primary_key(&self) -> Vec<String> {
        self.primary_key_columns
            .as_deref()
            .map(|cols| {
                cols.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub schema: String,
    pub table: String,
    pub strategy: Option<String>,
    pub last_sync: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub inserted: i64,
    pub updated: i64,
    pub deleted: i64,
    pub error: Option<String>,
}

/// Reads and writes the ledger table. Holds no connection; every call takes the
/// destination executor explicitly.
#[derive(Debug, Clone)]
pub struct SyncLedger {
    schema: String,
    table: String,
}

impl SyncLedger {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            schema: config.schema.clone(),
            table: config.table.clone(),
        }
    }

    /// `[dbo].[SyncMetadata]` by default.
    pub fn table_name(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }

    /// Create the ledger table and its index if they do not exist yet.
    pub async fn ensure_table(&self, db: &mut dyn Executor) -> Result<()> {
        let name = self.table_name();
        let index = format!("IX_{}_LastSync", self.table.replace(']', ""));
        let unique = format!("UQ_{}_Table", self.table.replace(']', ""));
        let sql = format!(
            "IF NOT EXISTS (
    SELECT 1 FROM sys.tables t
    INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = {schema_literal} AND t.name = {table_literal}
)
BEGIN
    CREATE TABLE {name} (
        id INT IDENTITY(1,1) PRIMARY KEY,
        schema_name NVARCHAR(128) NOT NULL,
        table_name NVARCHAR(128) NOT NULL,
        primary_key_columns NVARCHAR(MAX) NULL,
        pk_auto_detected BIT NOT NULL DEFAULT 1,
        where_clause NVARCHAR(MAX) NULL,
        change_detection_strategy NVARCHAR(50) NULL,
        rowversion_column NVARCHAR(128) NULL,
        last_rowversion_synced BINARY(8) NULL,
        last_hash_synced NVARCHAR(64) NULL,
        last_sync_date DATETIME2 NULL,
        last_sync_status NVARCHAR(50) NULL,
        records_inserted BIGINT NOT NULL DEFAULT 0,
        records_updated BIGINT NOT NULL DEFAULT 0,
        records_deleted BIGINT NOT NULL DEFAULT 0,
        last_error_message NVARCHAR(MAX) NULL,
        last_error_date DATETIME2 NULL,
        created_date DATETIME2 NOT NULL DEFAULT GETDATE(),
        modified_date DATETIME2 NOT NULL DEFAULT GETDATE(),
        CONSTRAINT [{unique}] UNIQUE (schema_name, table_name)
    );
    CREATE INDEX [{index}] ON {name} (last_sync_date DESC);
END",
            schema_literal = quote_literal(&self.schema),
            table_literal = quote_literal(&self.table),
            name = name,
            unique = unique,
            index = index,
        );

        db.execute_non_query(&sql, &[], true)
            .await
            .with_context(|| format!("Failed to create ledger table {}", name))?;
        tracing::debug!("Ledger table {} is ready", name);
        Ok(())
    }

    pub async fn get(
        &self,
        db: &mut dyn Executor,
        schema: &str,
        table: &str,
    ) -> Result<Option<SyncMetadata>> {
        let sql = format!(
            "SELECT id, schema_name, table_name, primary_key_columns, pk_auto_detected, \
             where_clause, change_detection_strategy, rowversion_column, last_rowversion_synced, \
             last_hash_synced, last_sync_date, last_sync_status, records_inserted, \
             records_updated, records_deleted, last_error_message, last_error_date, \
             created_date, modified_date \
             FROM {} WHERE schema_name = @P1 AND table_name = @P2",
            self.table_name()
        );
        let rows = db
            .execute_query(&sql, &[SqlValue::from(schema), SqlValue::from(table)])
            .await
            .context("Failed to read sync metadata")?;
        rows.first().map(SyncMetadata::from_row).transpose()
    }

    /// Insert or refresh the configuration part of a table's row.
    pub async fn upsert_config(
        &self,
        db: &mut dyn Executor,
        config: &TableSyncConfig,
    ) -> Result<()> {
        let sql = format!(
            "MERGE {} AS target
USING (SELECT @P1 AS schema_name, @P2 AS table_name) AS source
ON target.schema_name = source.schema_name AND target.table_name = source.table_name
WHEN MATCHED THEN
    UPDATE SET
        primary_key_columns = @P3,
        pk_auto_detected = @P4,
        where_clause = @P5,
        change_detection_strategy = @P6,
        rowversion_column = @P7,
        modified_date = GETDATE()
WHEN NOT MATCHED THEN
    INSERT (schema_name, table_name, primary_key_columns, pk_auto_detected,
            where_clause, change_detection_strategy, rowversion_column)
    VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7);",
            self.table_name()
        );

        let pk = if config.primary_key_columns.is_empty() {
            None
        } else {
            Some(config.primary_key_columns.join(","))
        };
        let params = [
            SqlValue::from(config.schema.as_str()),
            SqlValue::from(config.table.as_str()),
            SqlValue::opt_string(pk.as_deref()),
            SqlValue::Bool(config.pk_auto_detected),
            SqlValue::opt_string(config.filter()),
            SqlValue::opt_string(config.change_detection_strategy.map(|s| s.as_str())),
            SqlValue::opt_string(config.rowversion_column.as_deref()),
        ];

        db.execute_non_query(&sql, &params, true)
            .await
            .with_context(|| {
                format!("Failed to record configuration for {}", config.full_name())
            })?;
        tracing::debug!("Ledger configuration recorded for {}", config.full_name());
        Ok(())
    }

    /// Record the outcome of one run.
    ///
    /// Counters are incremented by `stats`; date, status and error are
    /// overwritten. A `None` error clears the previous message.
    pub async fn update_status(
        &self,
        db: &mut dyn Executor,
        schema: &str,
        table: &str,
        status: SyncStatus,
        stats: &SyncStats,
        error: Option<&str>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET
    last_sync_date = GETDATE(),
    last_sync_status = @P1,
    records_inserted = records_inserted + @P2,
    records_updated = records_updated + @P3,
    records_deleted = records_deleted + @P4,
    last_error_message = @P5,
    last_error_date = CASE WHEN @P5 IS NULL THEN last_error_date ELSE GETDATE() END,
    modified_date = GETDATE()
WHERE schema_name = @P6 AND table_name = @P7",
            self.table_name()
        );
        let params = [
            SqlValue::from(status.as_str()),
            SqlValue::I64(counter(stats.inserted)),
            SqlValue::I64(counter(stats.updated)),
            SqlValue::I64(counter(stats.deleted)),
            SqlValue::opt_string(error),
            SqlValue::from(schema),
            SqlValue::from(table),
        ];

        db.execute_non_query(&sql, &params, true)
            .await
            .with_context(|| {
                format!(
                    "Failed to record sync status for {}",
                    qualified_name(schema, table)
                )
            })?;
        Ok(())
    }

    pub async fn update_rowversion_watermark(
        &self,
        db: &mut dyn Executor,
        schema: &str,
        table: &str,
        rowversion: &[u8],
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET last_rowversion_synced = @P1, modified_date = GETDATE() \
             WHERE schema_name = @P2 AND table_name = @P3",
            self.table_name()
        );
        let params = [
            SqlValue::Binary(rowversion.to_vec()),
            SqlValue::from(schema),
            SqlValue::from(table),
        ];
        db.execute_non_query(&sql, &params, true)
            .await
            .context("Failed to store rowversion watermark")?;
        Ok(())
    }

    pub async fn update_hash_watermark(
        &self,
        db: &mut dyn Executor,
        schema: &str,
        table: &str,
        hash: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET last_hash_synced = @P1, modified_date = GETDATE() \
             WHERE schema_name = @P2 AND table_name = @P3",
            self.table_name()
        );
        let params = [SqlValue::from(hash), SqlValue::from(schema), SqlValue::from(table)];
        db.execute_non_query(&sql, &params, true)
            .await
            .context("Failed to store hash watermark")?;
        Ok(())
    }

    /// Zero the counters and clear error and watermarks. Returns whether the table was tracked.
    pub async fn reset(&self, db: &mut dyn Executor, schema: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET
    last_rowversion_synced = NULL,
    last_hash_synced = NULL,
    records_inserted = 0,
    records_updated = 0,
    records_deleted = 0,
    last_error_message = NULL,
    last_error_date = NULL,
    modified_date = GETDATE()
WHERE schema_name = @P1 AND table_name = @P2",
            self.table_name()
        );
        let affected = db
            .execute_non_query(&sql, &[SqlValue::from(schema), SqlValue::from(table)], true)
            .await
            .context("Failed to reset sync metadata")?;
        tracing::info!("Sync metadata reset for {}", qualified_name(schema, table));
        Ok(affected > 0)
    }

    /// Every tracked table, most recently synchronized first.
    pub async fn summary(&self, db: &mut dyn Executor) -> Result<Vec<SyncSummary>> {
        let sql = format!(
            "SELECT schema_name, table_name, change_detection_strategy, last_sync_date, \
             last_sync_status, records_inserted, records_updated, records_deleted, \
             last_error_message \
             FROM {} ORDER BY last_sync_date DESC",
            self.table_name()
        );
        let rows = db
            .execute_query(&sql, &[])
            .await
            .context("Failed to read sync summary")?;

        rows.iter()
            .map(|row| {
                Ok(SyncSummary {
                    schema: row.get_string(0)?,
                    table: row.get_string(1)?,
                    strategy: row.get_opt_string(2)?,
                    last_sync: row.get_opt_datetime(3)?,
                    status: row.get_opt_string(4)?,
                    inserted: row.get_opt_i64(5)?.unwrap_or(0),
                    updated: row.get_opt_i64(6)?.unwrap_or(0),
                    deleted: row.get_opt_i64(7)?.unwrap_or(0),
                    error: row.get_opt_string(8)?,
                })
            })
            .collect()
    }
}

fn counter(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
