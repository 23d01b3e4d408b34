// ABOUTME: Tables command: lists user tables in the source database
// ABOUTME: Marks which ones are configured for synchronization

use anyhow::Result;

use super::connect_source;
use crate::config::AppConfig;
use crate::db::Executor;

pub async fn tables(config: &AppConfig) -> Result<()> {
    let mut source = connect_source(config).await?;
    let tables = source.get_tables().await?;

    println!("{:<3} {:<50} {:>14}", "", "TABLE", "ROWS");
    for info in &tables {
        let configured = config.tables.iter().any(|t| {
            t.schema.eq_ignore_ascii_case(&info.schema) && t.table.eq_ignore_ascii_case(&info.table)
        });
        println!(
            "{:<3} {:<50} {:>14}",
            if configured { "*" } else { "" },
            info.qualified_name(),
            info.row_count
        );
    }
    println!();
    println!("{} tables ({} configured)", tables.len(), config.tables.len());
    Ok(())
}
