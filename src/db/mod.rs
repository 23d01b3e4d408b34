// ABOUTME: Query executor contract consumed by the synchronization engine
// ABOUTME: Parameterized reads, writes, batch execution and explicit transactions

pub mod mssql;
pub mod value;

pub use mssql::MssqlExecutor;
pub use value::{Row, RowKey, RowShape, SqlKind, SqlValue};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// A user table visible in a database, as listed by [`Executor::get_tables`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub table: String,
    pub object_id: i32,
    pub row_count: i64,
}

impl TableInfo {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Marker error for a dropped or unreachable connection.
///
/// Executors wrap transport failures in this type so the engine can tell a
/// run-fatal connection problem apart from a statement that merely failed.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ConnectionLost(pub String);

/// Statement execution against one database.
///
/// Parameters are bound positionally as `@P1..@Pn`. Mutating operations take a
/// `commit` flag: when `false` the work stays inside the currently open
/// transaction (see [`Executor::begin_transaction`]).
#[async_trait]
pub trait Executor: Send {
    /// Run a parameterized read and return all rows in order.
    async fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// First column of the first row, or `None` when there are no rows or the value is NULL.
    async fn execute_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>>;

    /// Run a statement that returns no rows. Returns the affected row count.
    async fn execute_non_query(&mut self, sql: &str, params: &[SqlValue], commit: bool)
        -> Result<u64>;

    /// Run one statement template once per parameter row, as a single unit of work.
    ///
    /// A failure rolls back every row of this call.
    async fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlValue>], commit: bool)
        -> Result<u64>;

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool>;

    async fn get_table_object_id(&mut self, schema: &str, table: &str) -> Result<Option<i32>>;

    /// User tables with approximate row counts, ordered by schema and name.
    async fn get_tables(&mut self) -> Result<Vec<TableInfo>>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
