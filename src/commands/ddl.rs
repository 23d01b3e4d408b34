// ABOUTME: DDL command: prints the mirror-creation script for a source table
// ABOUTME: Dry-run preview of what sync would execute for a missing destination table

use anyhow::Result;

use super::connect_source;
use crate::config::AppConfig;
use crate::schema::{render_script, SchemaExtractor};
use crate::utils::parse_table_name;

pub async fn ddl(config: &AppConfig, table: &str) -> Result<()> {
    let (schema, table) = parse_table_name(table)?;
    let mut source = connect_source(config).await?;
    let definition = SchemaExtractor::new(&mut source)
        .get_table_definition(&schema, &table)
        .await?;
    print!("{}", render_script(&definition));
    Ok(())
}
