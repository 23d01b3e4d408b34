// ABOUTME: Library root for table-replicator
// ABOUTME: SQL Server table mirroring: schema extraction, DDL generation and diff-based sync

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod schema;
pub mod sync;
pub mod utils;

pub use config::{AppConfig, TableSyncConfig};
pub use error::SyncError;
pub use ledger::SyncLedger;
pub use sync::{RunStats, SyncOrchestrator, TableSynchronizer};
