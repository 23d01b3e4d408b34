// ABOUTME: Command implementations for the table-replicator CLI
// ABOUTME: Exports sync, status, reset, tables, ddl and validate commands

pub mod ddl;
pub mod progress;
pub mod reset;
pub mod status;
pub mod sync;
pub mod tables;
pub mod validate;

pub use ddl::ddl;
pub use reset::reset;
pub use status::status;
pub use sync::sync;
pub use tables::tables;
pub use validate::validate;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::db::MssqlExecutor;

pub(crate) async fn connect_source(config: &AppConfig) -> Result<MssqlExecutor> {
    MssqlExecutor::connect(&config.source, &config.sync)
        .await
        .context("Failed to connect to source database")
}

pub(crate) async fn connect_destination(config: &AppConfig) -> Result<MssqlExecutor> {
    MssqlExecutor::connect(&config.destination, &config.sync)
        .await
        .context("Failed to connect to destination database")
}
