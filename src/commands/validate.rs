// ABOUTME: Validate command: checks both connections and the configured tables
// ABOUTME: Fails when an endpoint is unreachable or a configured table is missing at source

use anyhow::{bail, Result};

use super::{connect_destination, connect_source};
use crate::config::AppConfig;
use crate::db::{Executor, SqlValue};

pub async fn validate(config: &AppConfig) -> Result<()> {
    println!("Checking source {} ...", config.source.display_name());
    let mut source = connect_source(config).await?;
    print_version(&mut source).await?;

    println!("Checking destination {} ...", config.destination.display_name());
    let mut dest = connect_destination(config).await?;
    print_version(&mut dest).await?;

    let mut missing = Vec::new();
    for table in config.tables.iter().filter(|t| t.is_runnable()) {
        if source.table_exists(&table.schema, &table.table).await? {
            let at_dest = dest.table_exists(&table.schema, &table.table).await?;
            println!(
                "  ✓ {}{}",
                table.display_name(),
                if at_dest { "" } else { " (mirror will be created)" }
            );
        } else {
            println!("  ✗ {} not found at source", table.display_name());
            missing.push(table.display_name());
        }
    }

    if !missing.is_empty() {
        bail!("{} configured tables are missing at source: {}", missing.len(), missing.join(", "));
    }
    println!("Configuration is valid.");
    Ok(())
}

async fn print_version(db: &mut dyn Executor) -> Result<()> {
    if let Some(SqlValue::String(version)) = db.execute_scalar("SELECT @@VERSION", &[]).await? {
        println!("  {}", version.lines().next().unwrap_or_default());
    }
    Ok(())
}
