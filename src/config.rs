// ABOUTME: Configuration file model for table-replicator
// ABOUTME: Connection endpoints, sync options, ledger location, and per-table settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::ChangeDetectionStrategy;
use crate::utils::qualified_name;

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 50_000;
pub const DEFAULT_UPDATE_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration, usually loaded from `config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub tables: Vec<TableSyncConfig>,
}

impl AppConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)?;
        for table in &mut config.tables {
            table.pk_auto_detected = table.primary_key_columns.is_empty();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate().context("Invalid [source] section")?;
        self.destination
            .validate()
            .context("Invalid [destination] section")?;
        self.sync.validate()?;
        for table in &self.tables {
            if table.schema.trim().is_empty() || table.table.trim().is_empty() {
                bail!("Every [[tables]] entry needs a schema and a table name");
            }
        }
        Ok(())
    }

    /// `~/.table-replicator/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home_dir.join(".table-replicator").join("config.toml"))
    }
}

/// How to reach one SQL Server database. Only SQL authentication is supported.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub username: String,
    /// Inline password. Prefer `password_env` outside of local testing.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Name of an environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub trust_server_certificate: bool,
}

fn default_port() -> u16 {
    1433
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() || self.database.trim().is_empty() {
            bail!("server and database are required");
        }
        if self.username.trim().is_empty() {
            bail!("username is required for SQL Server authentication");
        }
        Ok(())
    }

    /// Resolve the password, preferring the inline value over `password_env`.
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        match &self.password_env {
            Some(var) => std::env::var(var)
                .with_context(|| format!("Environment variable {} is not set", var)),
            None => Ok(String::new()),
        }
    }

    /// `server:port/database`, safe to log.
    pub fn display_name(&self) -> String {
        format!("{}:{}/{}", self.server, self.port, self.database)
    }
}

/// Deployment-wide tuning. Applies to every table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Rows per committed insert batch.
    pub insert_batch_size: usize,
    /// Rows per committed update batch; also used for delete batches.
    pub update_batch_size: usize,
    pub command_timeout_secs: u64,
    pub connection_timeout_secs: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            update_batch_size: DEFAULT_UPDATE_BATCH_SIZE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
        }
    }
}

impl SyncOptions {
    pub fn validate(&self) -> Result<()> {
        if self.insert_batch_size == 0 || self.update_batch_size == 0 {
            bail!("Batch sizes must be greater than zero");
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Location of the sync metadata ledger in the destination database.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub schema: String,
    pub table: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            schema: "dbo".to_string(),
            table: "SyncMetadata".to_string(),
        }
    }
}

/// Synchronization settings for one table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TableSyncConfig {
    pub schema: String,
    pub table: String,
    /// Key columns used to match rows. Empty means "detect from the source primary key".
    #[serde(default, rename = "primary_key")]
    pub primary_key_columns: Vec<String>,
    #[serde(skip, default = "default_true")]
    pub pk_auto_detected: bool,
    /// Raw boolean predicate evaluated by the database on both sides.
    #[serde(default, rename = "filter")]
    pub where_clause: Option<String>,
    #[serde(default = "default_true")]
    pub selected: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(skip)]
    pub change_detection_strategy: Option<ChangeDetectionStrategy>,
    #[serde(skip)]
    pub rowversion_column: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TableSyncConfig {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            primary_key_columns: Vec::new(),
            pk_auto_detected: true,
            where_clause: None,
            selected: true,
            enabled: true,
            change_detection_strategy: None,
            rowversion_column: None,
        }
    }

    /// Override the key columns instead of detecting them.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key_columns = columns.iter().map(|c| c.to_string()).collect();
        self.pk_auto_detected = false;
        self
    }

    pub fn with_filter(mut self, predicate: &str) -> Self {
        self.where_clause = Some(predicate.to_string());
        self
    }

    /// `[schema].[table]`
    pub fn full_name(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }

    /// `schema.table`
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// The configured filter, if it is non-blank.
    pub fn filter(&self) -> Option<&str> {
        self.where_clause
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
    }

    pub fn is_runnable(&self) -> bool {
        self.selected && self.enabled
    }
}
