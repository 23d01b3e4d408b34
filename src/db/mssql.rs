// ABOUTME: SQL Server implementation of the Executor trait on top of tiberius
// ABOUTME: Handles connection setup, value conversion, timeouts and explicit transactions

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{ConnectionLost, Executor, Row, SqlKind, SqlValue, TableInfo};
use crate::config::{ConnectionConfig, SyncOptions};

/// One long-lived connection to a SQL Server database.
pub struct MssqlExecutor {
    client: Client<Compat<TcpStream>>,
    label: String,
    command_timeout: Duration,
    in_transaction: bool,
}

impl MssqlExecutor {
    /// Connect using SQL authentication.
    ///
    /// Any failure here is reported as [`ConnectionLost`], since nothing can run
    /// without the connection.
    pub async fn connect(conn: &ConnectionConfig, options: &SyncOptions) -> Result<Self> {
        let label = conn.display_name();
        let mut config = Config::new();
        config.host(&conn.server);
        config.port(conn.port);
        config.database(&conn.database);
        config.authentication(AuthMethod::sql_server(
            &conn.username,
            conn.resolve_password()?,
        ));
        if conn.trust_server_certificate {
            config.trust_cert();
        }

        tracing::debug!("Connecting to {}", label);

        let connect = async {
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            let client = Client::connect(config, tcp.compat_write()).await?;
            Ok::<_, anyhow::Error>(client)
        };

        let client = match tokio::time::timeout(options.connection_timeout(), connect).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                return Err(anyhow::Error::new(ConnectionLost(format!(
                    "Failed to connect to {}: {:#}",
                    label, e
                ))))
            }
            Err(_) => {
                return Err(anyhow::Error::new(ConnectionLost(format!(
                    "Timed out connecting to {} after {}s",
                    label,
                    options.connection_timeout().as_secs()
                ))))
            }
        };

        tracing::info!("Connected to {}", label);

        Ok(Self {
            client,
            label,
            command_timeout: options.command_timeout(),
            in_transaction: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = tiberius::Result<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(classify),
            // tiberius cannot cancel an in-flight request, so the session is unusable
            Err(_) => Err(anyhow::Error::new(ConnectionLost(format!(
                "Command timed out after {}s; connection abandoned",
                timeout.as_secs()
            )))),
        }
    }

    /// Run a statement outside of `sp_executesql`. Transaction control must go
    /// through here: a BEGIN inside `sp_executesql` trips the transaction count check.
    async fn simple(&mut self, sql: &str) -> Result<()> {
        let timeout = self.command_timeout;
        let client = &mut self.client;
        Self::with_timeout(timeout, async move {
            client.simple_query(sql).await?.into_results().await?;
            Ok(())
        })
        .await
        .with_context(|| format!("Failed to execute '{}' on {}", sql, self.label))
    }

    async fn execute_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let timeout = self.command_timeout;
        let client = &mut self.client;
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let result = Self::with_timeout(timeout, client.execute(sql, &refs)).await?;
        Ok(result.total())
    }
}

/// Transport failures become [`ConnectionLost`]; everything else stays a plain statement error.
fn classify(err: tiberius::error::Error) -> anyhow::Error {
    use tiberius::error::Error;

    if matches!(err, Error::Io { .. } | Error::Tls(_) | Error::Routing { .. }) {
        return anyhow::Error::new(ConnectionLost(err.to_string()));
    }
    anyhow::Error::new(err)
}

#[async_trait]
impl Executor for MssqlExecutor {
    async fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        tracing::debug!("query: {}", sql);
        let timeout = self.command_timeout;
        let client = &mut self.client;
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let rows = Self::with_timeout(timeout, async {
            client.query(sql, &refs).await?.into_first_result().await
        })
        .await
        .with_context(|| format!("Query failed on {}", self.label))?;

        rows.into_iter().map(convert_row).collect()
    }

    async fn execute_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let rows = self.execute_query(sql, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next())
            .filter(|value| !value.is_null()))
    }

    async fn execute_non_query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        commit: bool,
    ) -> Result<u64> {
        tracing::debug!("execute: {}", sql);
        let affected = self
            .execute_one(sql, params)
            .await
            .with_context(|| format!("Statement failed on {}", self.label))?;
        if commit && self.in_transaction {
            self.commit().await?;
        }
        Ok(affected)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlValue>],
        commit: bool,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        tracing::debug!("batch of {} rows: {}", rows.len(), sql);
        let owned = !self.in_transaction;
        if owned {
            self.begin_transaction().await?;
        }

        let mut affected = 0u64;
        for params in rows {
            match self.execute_one(sql, params).await {
                Ok(n) => affected += n,
                Err(e) => {
                    if owned {
                        if let Err(rollback_err) = self.rollback().await {
                            tracing::warn!("Rollback failed on {}: {:#}", self.label, rollback_err);
                        }
                    }
                    return Err(e).with_context(|| format!("Batch failed on {}", self.label));
                }
            }
        }

        if commit {
            self.commit().await?;
        }
        Ok(affected)
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self.get_table_object_id(schema, table).await?.is_some())
    }

    async fn get_table_object_id(&mut self, schema: &str, table: &str) -> Result<Option<i32>> {
        let sql = "SELECT t.object_id FROM sys.tables t \
                   JOIN sys.schemas s ON s.schema_id = t.schema_id \
                   WHERE s.name = @P1 AND t.name = @P2";
        let value = self
            .execute_scalar(sql, &[SqlValue::from(schema), SqlValue::from(table)])
            .await?;
        match value {
            Some(v) => {
                let id = v
                    .as_i64()
                    .ok_or_else(|| anyhow!("unexpected object_id value {:?}", v))?;
                Ok(Some(i32::try_from(id)?))
            }
            None => Ok(None),
        }
    }

    async fn get_tables(&mut self) -> Result<Vec<TableInfo>> {
        let sql = "SELECT s.name, t.name, t.object_id, CAST(SUM(p.rows) AS BIGINT) \
                   FROM sys.tables t \
                   JOIN sys.schemas s ON s.schema_id = t.schema_id \
                   JOIN sys.partitions p ON p.object_id = t.object_id AND p.index_id IN (0, 1) \
                   WHERE t.is_ms_shipped = 0 \
                   GROUP BY s.name, t.name, t.object_id \
                   ORDER BY s.name, t.name";
        let rows = self.execute_query(sql, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(TableInfo {
                    schema: row.get_string(0)?,
                    table: row.get_string(1)?,
                    object_id: i32::try_from(row.get_i64(2)?)?,
                    row_count: row.get_opt_i64(3)?.unwrap_or(0),
                })
            })
            .collect()
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            bail!("A transaction is already open on {}", self.label);
        }
        self.simple("BEGIN TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.simple("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        // XACT_ABORT errors may already have rolled back server-side
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null(kind) => null_data(*kind),
            SqlValue::Bool(v) => ColumnData::Bit(Some(*v)),
            SqlValue::U8(v) => ColumnData::U8(Some(*v)),
            SqlValue::I16(v) => ColumnData::I16(Some(*v)),
            SqlValue::I32(v) => ColumnData::I32(Some(*v)),
            SqlValue::I64(v) => ColumnData::I64(Some(*v)),
            SqlValue::F32(v) => ColumnData::F32(Some(*v)),
            SqlValue::F64(v) => ColumnData::F64(Some(*v)),
            SqlValue::Decimal(v) => ColumnData::Numeric(Some(decimal_to_numeric(v))),
            SqlValue::String(v) => ColumnData::String(Some(Cow::Borrowed(v.as_str()))),
            SqlValue::Binary(v) => ColumnData::Binary(Some(Cow::Borrowed(v.as_slice()))),
            SqlValue::Guid(v) => ColumnData::Guid(Some(*v)),
            SqlValue::Date(v) => v.to_sql(),
            SqlValue::Time(v) => v.to_sql(),
            SqlValue::DateTime(v) => v.to_sql(),
            SqlValue::DateTimeOffset(v) => v.to_sql(),
        }
    }
}

fn null_data(kind: SqlKind) -> ColumnData<'static> {
    match kind {
        SqlKind::Bool => ColumnData::Bit(None),
        SqlKind::U8 => ColumnData::U8(None),
        SqlKind::I16 => ColumnData::I16(None),
        SqlKind::I32 => ColumnData::I32(None),
        SqlKind::I64 => ColumnData::I64(None),
        SqlKind::F32 => ColumnData::F32(None),
        SqlKind::F64 => ColumnData::F64(None),
        SqlKind::Decimal => ColumnData::Numeric(None),
        SqlKind::String => ColumnData::String(None),
        SqlKind::Binary => ColumnData::Binary(None),
        SqlKind::Guid => ColumnData::Guid(None),
        SqlKind::Date => ColumnData::Date(None),
        SqlKind::Time => ColumnData::Time(None),
        SqlKind::DateTime => ColumnData::DateTime2(None),
        SqlKind::DateTimeOffset => ColumnData::DateTimeOffset(None),
    }
}

fn decimal_to_numeric(value: &Decimal) -> Numeric {
    Numeric::new_with_scale(value.mantissa(), value.scale() as u8)
}

fn numeric_to_decimal(value: Numeric) -> Result<Decimal> {
    Decimal::try_from_i128_with_scale(value.value(), u32::from(value.scale()))
        .map_err(|e| anyhow!("numeric value {} does not fit a decimal: {}", value, e))
}

fn convert_row(row: tiberius::Row) -> Result<Row> {
    let values = row
        .into_iter()
        .map(convert_cell)
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(values))
}

fn convert_cell(data: ColumnData<'static>) -> Result<SqlValue> {
    fn temporal<T>(
        data: &ColumnData<'static>,
        kind: SqlKind,
        wrap: fn(T) -> SqlValue,
    ) -> Result<SqlValue>
    where
        T: for<'a> FromSql<'a>,
    {
        Ok(T::from_sql(data)?.map(wrap).unwrap_or(SqlValue::Null(kind)))
    }

    let value = match data {
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null(SqlKind::Bool)),
        ColumnData::U8(v) => v.map(SqlValue::U8).unwrap_or(SqlValue::Null(SqlKind::U8)),
        ColumnData::I16(v) => v.map(SqlValue::I16).unwrap_or(SqlValue::Null(SqlKind::I16)),
        ColumnData::I32(v) => v.map(SqlValue::I32).unwrap_or(SqlValue::Null(SqlKind::I32)),
        ColumnData::I64(v) => v.map(SqlValue::I64).unwrap_or(SqlValue::Null(SqlKind::I64)),
        ColumnData::F32(v) => v.map(SqlValue::F32).unwrap_or(SqlValue::Null(SqlKind::F32)),
        ColumnData::F64(v) => v.map(SqlValue::F64).unwrap_or(SqlValue::Null(SqlKind::F64)),
        ColumnData::Numeric(v) => match v {
            Some(n) => SqlValue::Decimal(numeric_to_decimal(n)?),
            None => SqlValue::Null(SqlKind::Decimal),
        },
        ColumnData::String(v) => match v {
            Some(s) => SqlValue::String(s.into_owned()),
            None => SqlValue::Null(SqlKind::String),
        },
        ColumnData::Xml(v) => match v {
            Some(x) => SqlValue::String(x.into_owned().into_string()),
            None => SqlValue::Null(SqlKind::String),
        },
        ColumnData::Binary(v) => match v {
            Some(b) => SqlValue::Binary(b.into_owned()),
            None => SqlValue::Null(SqlKind::Binary),
        },
        ColumnData::Guid(v) => v.map(SqlValue::Guid).unwrap_or(SqlValue::Null(SqlKind::Guid)),
        ref d @ ColumnData::Date(_) => temporal::<NaiveDate>(d, SqlKind::Date, SqlValue::Date)?,
        ref d @ ColumnData::Time(_) => temporal::<NaiveTime>(d, SqlKind::Time, SqlValue::Time)?,
        ref d @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => {
            temporal::<NaiveDateTime>(d, SqlKind::DateTime, SqlValue::DateTime)?
        }
        ref d @ ColumnData::DateTimeOffset(_) => temporal::<DateTime<FixedOffset>>(
            d,
            SqlKind::DateTimeOffset,
            SqlValue::DateTimeOffset,
        )?,
        #[allow(unreachable_patterns)]
        other => bail!("unsupported column type: {:?}", other),
    };
    Ok(value)
}
