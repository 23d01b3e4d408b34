// ABOUTME: Sync command: runs the orchestrator over the configured tables
// ABOUTME: Optional --table arguments restrict the run to specific tables

use anyhow::Result;

use super::progress::TerminalProgress;
use super::{connect_destination, connect_source};
use crate::config::{AppConfig, TableSyncConfig};
use crate::ledger::SyncLedger;
use crate::sync::{RunStats, SyncOrchestrator};
use crate::utils::parse_table_name;

/// Synchronize the configured tables, or only `only_tables` when given.
///
/// Tables named on the command line but missing from the config are synced
/// with default settings (detected key, no filter).
pub async fn sync(config: &AppConfig, only_tables: &[String]) -> Result<RunStats> {
    let tables = select_tables(&config.tables, only_tables)?;
    if tables.is_empty() {
        tracing::warn!("No tables selected for synchronization");
        return Ok(RunStats::default());
    }

    let mut source = connect_source(config).await?;
    let mut dest = connect_destination(config).await?;

    let ledger = SyncLedger::new(&config.ledger);
    let mut orchestrator =
        SyncOrchestrator::new(&mut source, &mut dest, ledger, config.sync.clone());
    let mut progress = TerminalProgress::new();
    let stats = orchestrator.run(&tables, &mut progress).await;
    drop(progress);

    println!();
    println!(
        "Tables:   {} succeeded, {} failed",
        stats.tables_succeeded, stats.tables_failed
    );
    println!("Inserted: {}", stats.total_inserted);
    println!("Updated:  {}", stats.total_updated);
    println!("Deleted:  {}", stats.total_deleted);
    if !stats.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &stats.errors {
            println!("  - {}", error);
        }
        if stats.errors_truncated > 0 {
            println!("  ... and {} more", stats.errors_truncated);
        }
    }
    if stats.aborted {
        println!();
        println!("Run aborted: connection lost");
    }

    Ok(stats)
}

fn select_tables(configured: &[TableSyncConfig], only: &[String]) -> Result<Vec<TableSyncConfig>> {
    if only.is_empty() {
        return Ok(configured.to_vec());
    }

    let mut selected = Vec::with_capacity(only.len());
    for name in only {
        let (schema, table) = parse_table_name(name)?;
        let config = configured
            .iter()
            .find(|t| {
                t.schema.eq_ignore_ascii_case(&schema) && t.table.eq_ignore_ascii_case(&table)
            })
            .cloned()
            .map(|mut t| {
                t.selected = true;
                t
            })
            .unwrap_or_else(|| TableSyncConfig::new(&schema, &table));
        selected.push(config);
    }
    Ok(selected)
}
