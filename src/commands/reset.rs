// ABOUTME: Reset command: zeroes a table's ledger counters and watermarks
// ABOUTME: Forces the next run to treat the table as never synchronized

use anyhow::Result;

use super::connect_destination;
use crate::config::AppConfig;
use crate::ledger::SyncLedger;
use crate::utils::parse_table_name;

pub async fn reset(config: &AppConfig, table: &str) -> Result<()> {
    let (schema, table) = parse_table_name(table)?;
    let mut dest = connect_destination(config).await?;
    let ledger = SyncLedger::new(&config.ledger);
    ledger.ensure_table(&mut dest).await?;

    if ledger.reset(&mut dest, &schema, &table).await? {
        println!("Sync metadata reset for {}.{}", schema, table);
    } else {
        println!("{}.{} is not tracked in {}", schema, table, ledger.table_name());
    }
    Ok(())
}
