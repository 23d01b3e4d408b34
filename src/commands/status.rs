// ABOUTME: Status command: prints the sync ledger summary
// ABOUTME: Human-readable table or JSON output

use anyhow::{Context, Result};

use super::connect_destination;
use crate::config::AppConfig;
use crate::ledger::{SyncLedger, SyncSummary};

pub async fn status(config: &AppConfig, json: bool) -> Result<()> {
    let mut dest = connect_destination(config).await?;
    let ledger = SyncLedger::new(&config.ledger);
    ledger.ensure_table(&mut dest).await?;
    let summary = ledger.summary(&mut dest).await?;

    if json {
        let output =
            serde_json::to_string_pretty(&summary).context("Failed to serialize sync summary")?;
        println!("{}", output);
        return Ok(());
    }

    if summary.is_empty() {
        println!("No tables have been synchronized yet.");
        return Ok(());
    }

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &[SyncSummary]) {
    println!(
        "{:<40} {:<10} {:<8} {:<20} {:>12} {:>12} {:>12}",
        "TABLE", "STRATEGY", "STATUS", "LAST SYNC", "INSERTED", "UPDATED", "DELETED"
    );
    for entry in summary {
        let last_sync = entry
            .last_sync
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<10} {:<8} {:<20} {:>12} {:>12} {:>12}",
            format!("{}.{}", entry.schema, entry.table),
            entry.strategy.as_deref().unwrap_or("-"),
            entry.status.as_deref().unwrap_or("-"),
            last_sync,
            entry.inserted,
            entry.updated,
            entry.deleted
        );
        if let Some(error) = &entry.error {
            println!("    error: {}", error);
        }
    }
}
