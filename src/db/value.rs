// ABOUTME: Typed SQL values and positional row shapes
// ABOUTME: Rows are addressed by pre-resolved column positions, never by runtime name lookup

use std::hash::{Hash, Hasher};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::utils::quote_ident;

/// SQL type family of a value; carried by NULLs so they can be bound as typed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlKind {
    Bool,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    String,
    Binary,
    Guid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
}

/// A single column value read from or written to SQL Server.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null(SqlKind),
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Binary(Vec<u8>),
    Guid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Nullable string parameter.
    pub fn opt_string(value: Option<&str>) -> Self {
        match value {
            Some(v) => SqlValue::String(v.to_string()),
            None => SqlValue::Null(SqlKind::String),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::U8(v) => Some(i64::from(*v)),
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }
}

// NULL equals NULL so unchanged nullable columns never produce spurious updates.
// Floats compare by bit pattern to keep Eq and Hash consistent.
impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        use SqlValue::*;
        match (self, other) {
            (Null(_), Null(_)) => true,
            (Bool(a), Bool(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (Decimal(a), Decimal(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (Guid(a), Guid(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (DateTimeOffset(a), DateTimeOffset(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use SqlValue::*;
        match self {
            Null(_) => 0u8.hash(state),
            Bool(v) => v.hash(state),
            U8(v) => v.hash(state),
            I16(v) => v.hash(state),
            I32(v) => v.hash(state),
            I64(v) => v.hash(state),
            F32(v) => v.to_bits().hash(state),
            F64(v) => v.to_bits().hash(state),
            // normalize so 1.0 and 1.00 (equal decimals) hash alike
            Decimal(v) => v.normalize().hash(state),
            String(v) => v.hash(state),
            Binary(v) => v.hash(state),
            Guid(v) => v.hash(state),
            Date(v) => v.hash(state),
            Time(v) => v.hash(state),
            DateTime(v) => v.hash(state),
            DateTimeOffset(v) => v.hash(state),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::String(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::String(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::I32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::I64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

/// One result row, values in select-list order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    fn value(&self, idx: usize) -> Result<&SqlValue> {
        self.values
            .get(idx)
            .ok_or_else(|| anyhow!("column index {} out of range ({} columns)", idx, self.len()))
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        let value = self.value(idx)?;
        value
            .as_i64()
            .ok_or_else(|| anyhow!("expected integer at column {}, got {:?}", idx, value))
    }

    /// Integer column that may be NULL (e.g. values from a LEFT JOIN).
    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>> {
        match self.value(idx)? {
            SqlValue::Null(_) => Ok(None),
            _ => self.get_i64(idx).map(Some),
        }
    }

    pub fn get_bool(&self, idx: usize) -> Result<bool> {
        match self.value(idx)? {
            SqlValue::Null(_) => Ok(false),
            value => value
                .as_bool()
                .ok_or_else(|| anyhow!("expected bit at column {}, got {:?}", idx, value)),
        }
    }

    pub fn get_string(&self, idx: usize) -> Result<String> {
        match self.value(idx)? {
            SqlValue::String(v) => Ok(v.clone()),
            other => bail!("expected string at column {}, got {:?}", idx, other),
        }
    }

    pub fn get_opt_string(&self, idx: usize) -> Result<Option<String>> {
        match self.value(idx)? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::String(v) => Ok(Some(v.clone())),
            other => bail!("expected string at column {}, got {:?}", idx, other),
        }
    }

    pub fn get_opt_binary(&self, idx: usize) -> Result<Option<Vec<u8>>> {
        match self.value(idx)? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Binary(v) => Ok(Some(v.clone())),
            other => bail!("expected binary at column {}, got {:?}", idx, other),
        }
    }

    pub fn get_opt_datetime(&self, idx: usize) -> Result<Option<NaiveDateTime>> {
        match self.value(idx)? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::DateTime(v) => Ok(Some(*v)),
            other => bail!("expected datetime at column {}, got {:?}", idx, other),
        }
    }

    /// Copy the values at `positions`, in that order.
    pub fn project(&self, positions: &[usize]) -> Vec<SqlValue> {
        positions.iter().map(|&i| self.values[i].clone()).collect()
    }
}

/// Primary-key tuple used for set membership and lookups. Equality only, never ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey(pub Vec<SqlValue>);

impl RowKey {
    pub fn from_row(row: &Row, key_positions: &[usize]) -> Self {
        RowKey(row.project(key_positions))
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.0
    }
}

/// The ordered column list a query selects. Positions are resolved once per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowShape {
    columns: Vec<String>,
}

impl RowShape {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// `primary` first, then any `extra` column not already present.
    pub fn union(primary: &[String], extra: &[String]) -> Self {
        let mut columns = primary.to_vec();
        for column in extra {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn positions(&self, columns: &[String]) -> Result<Vec<usize>> {
        columns
            .iter()
            .map(|c| {
                self.position(c)
                    .ok_or_else(|| anyhow!("column {} is not part of the selected row shape", c))
            })
            .collect()
    }

    /// `[a], [b], [c]`
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
