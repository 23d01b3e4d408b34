// ABOUTME: In-memory Executor used by the integration tests
// ABOUTME: Understands the catalog, DML and ledger statements the sync engine issues

#![allow(dead_code)]

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use table_replicator::db::{ConnectionLost, Executor, Row, SqlKind, SqlValue, TableInfo};
use table_replicator::schema::ColumnDefinition;

type TableKey = (String, String);

pub fn column(id: i32, name: &str, type_name: &str, nullable: bool) -> ColumnDefinition {
    let mut col = ColumnDefinition::new(id, name, type_name, nullable);
    col.max_length = match type_name {
        "nvarchar" | "varchar" => 100,
        "int" => 4,
        "timestamp" => 8,
        _ => 0,
    };
    col
}

pub fn identity(mut col: ColumnDefinition) -> ColumnDefinition {
    col.is_identity = true;
    col.identity_seed = 1;
    col.identity_increment = 1;
    col
}

pub fn computed(mut col: ColumnDefinition, expression: &str) -> ColumnDefinition {
    col.is_computed = true;
    col.computed_definition = Some(expression.to_string());
    col
}

pub fn int(v: i32) -> SqlValue {
    SqlValue::I32(v)
}

pub fn text(v: &str) -> SqlValue {
    SqlValue::from(v)
}

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub object_id: i32,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl FakeTable {
    fn position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| anyhow!("Invalid column name '{}'", column))
    }

    fn key_of(&self, row: &[SqlValue]) -> Result<Vec<SqlValue>> {
        self.primary_key
            .iter()
            .map(|c| Ok(row[self.position(c)?].clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LedgerEntry {
    pub id: i64,
    pub primary_key_columns: Option<String>,
    pub pk_auto_detected: bool,
    pub where_clause: Option<String>,
    pub strategy: Option<String>,
    pub rowversion_column: Option<String>,
    pub last_rowversion_synced: Option<Vec<u8>>,
    pub last_hash_synced: Option<String>,
    pub last_sync_date: Option<NaiveDateTime>,
    pub last_sync_status: Option<String>,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub records_deleted: i64,
    pub last_error_message: Option<String>,
    pub last_error_date: Option<NaiveDateTime>,
    pub created_date: Option<NaiveDateTime>,
    pub modified_date: Option<NaiveDateTime>,
}

struct FailRule {
    pattern: String,
    skip: usize,
    connection_lost: bool,
}

/// A single fake database.
pub struct FakeExecutor {
    pub name: String,
    pub tables: BTreeMap<TableKey, FakeTable>,
    pub ledger: BTreeMap<TableKey, LedgerEntry>,
    pub ledger_created: bool,
    /// Every mutating statement, in execution order.
    pub statements: Vec<String>,
    pub commits: usize,
    pub rollbacks: usize,
    snapshot: Option<BTreeMap<TableKey, FakeTable>>,
    in_transaction: bool,
    fail_rules: Vec<FailRule>,
    next_object_id: i32,
    next_rowversion: u64,
    clock: i64,
}

impl FakeExecutor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: BTreeMap::new(),
            ledger: BTreeMap::new(),
            ledger_created: false,
            statements: Vec::new(),
            commits: 0,
            rollbacks: 0,
            snapshot: None,
            in_transaction: false,
            fail_rules: Vec::new(),
            next_object_id: 1000,
            next_rowversion: 1,
            clock: 0,
        }
    }

    pub fn with_table(
        mut self,
        schema: &str,
        table: &str,
        columns: Vec<ColumnDefinition>,
        primary_key: &[&str],
    ) -> Self {
        self.create_table(schema, table, columns);
        if let Some(t) = self.tables.get_mut(&key(schema, table)) {
            t.primary_key = primary_key.iter().map(|c| c.to_string()).collect();
        }
        self
    }

    /// Add a row given values for every non-generated column, in column order.
    pub fn insert(&mut self, schema: &str, table: &str, values: Vec<SqlValue>) {
        let t = &self.tables[&key(schema, table)];
        let names: Vec<String> = t
            .columns
            .iter()
            .filter(|c| !c.is_computed && !c.is_rowversion())
            .map(|c| c.name.clone())
            .collect();
        self.insert_row(&key(schema, table), &names, values, true)
            .expect("seed row");
    }

    pub fn with_rows(mut self, schema: &str, table: &str, rows: Vec<Vec<SqlValue>>) -> Self {
        for row in rows {
            self.insert(schema, table, row);
        }
        self
    }

    pub fn table(&self, schema: &str, table: &str) -> &FakeTable {
        &self.tables[&key(schema, table)]
    }

    /// Values of `columns` for every row, sorted for stable comparison.
    pub fn select(&self, schema: &str, table: &str, columns: &[&str]) -> Vec<Vec<SqlValue>> {
        let t = self.table(schema, table);
        let positions: Vec<usize> = columns.iter().map(|c| t.position(c).unwrap()).collect();
        let mut rows: Vec<Vec<SqlValue>> = t
            .rows
            .iter()
            .map(|r| positions.iter().map(|&i| r[i].clone()).collect())
            .collect();
        rows.sort_by_key(|r| format!("{:?}", r));
        rows
    }

    pub fn set_value(&mut self, schema: &str, table: &str, id: i32, column: &str, value: SqlValue) {
        let rv = self.bump_rowversion();
        let t = self.tables.get_mut(&key(schema, table)).unwrap();
        let pos = t.position(column).unwrap();
        let rv_pos = t.columns.iter().position(|c| c.is_rowversion());
        for row in t.rows.iter_mut() {
            if row[0] == SqlValue::I32(id) {
                row[pos] = value.clone();
                if let Some(rv_pos) = rv_pos {
                    row[rv_pos] = rv.clone();
                }
            }
        }
    }

    /// Fail every statement containing `pattern`, after letting `skip` of them through.
    pub fn fail_when(&mut self, pattern: &str, skip: usize) {
        self.fail_rules.push(FailRule {
            pattern: pattern.to_string(),
            skip,
            connection_lost: false,
        });
    }

    /// Like `fail_when`, but the failure looks like a dropped connection.
    pub fn lose_connection_when(&mut self, pattern: &str) {
        self.lose_connection_after(pattern, 0);
    }

    /// Drops the connection on the first match after `skip` matching calls succeed.
    pub fn lose_connection_after(&mut self, pattern: &str, skip: usize) {
        self.fail_rules.push(FailRule {
            pattern: pattern.to_string(),
            skip,
            connection_lost: true,
        });
    }

    pub fn clear_failures(&mut self) {
        self.fail_rules.clear();
    }

    pub fn ledger_entry(&self, schema: &str, table: &str) -> Option<&LedgerEntry> {
        self.ledger.get(&key(schema, table))
    }

    pub fn count_statements(&self, prefix: &str) -> usize {
        self.statements.iter().filter(|s| s.starts_with(prefix)).count()
    }

    fn check_failure(&mut self, sql: &str) -> Result<()> {
        for rule in self.fail_rules.iter_mut() {
            if sql.contains(&rule.pattern) {
                if rule.skip > 0 {
                    rule.skip -= 1;
                    continue;
                }
                if rule.connection_lost {
                    return Err(anyhow::Error::new(ConnectionLost(format!(
                        "{}: connection reset",
                        self.name
                    ))));
                }
                bail!("{}: injected failure", self.name);
            }
        }
        Ok(())
    }

    fn now(&mut self) -> NaiveDateTime {
        self.clock += 1;
        chrono::DateTime::from_timestamp(1_700_000_000 + self.clock, 0)
            .unwrap()
            .naive_utc()
    }

    fn bump_rowversion(&mut self) -> SqlValue {
        let v = self.next_rowversion;
        self.next_rowversion += 1;
        SqlValue::Binary(v.to_be_bytes().to_vec())
    }

    fn create_table(&mut self, schema: &str, table: &str, columns: Vec<ColumnDefinition>) {
        self.next_object_id += 1;
        self.tables.insert(
            key(schema, table),
            FakeTable {
                object_id: self.next_object_id,
                columns,
                primary_key: Vec::new(),
                rows: Vec::new(),
            },
        );
    }

    fn table_by_id(&self, object_id: i32) -> Option<&FakeTable> {
        self.tables.values().find(|t| t.object_id == object_id)
    }

    fn lookup(&self, k: &TableKey) -> Result<&FakeTable> {
        self.tables
            .get(k)
            .ok_or_else(|| anyhow!("Invalid object name '{}.{}'", k.0, k.1))
    }

    fn insert_row(
        &mut self,
        k: &TableKey,
        columns: &[String],
        values: Vec<SqlValue>,
        allow_identity: bool,
    ) -> Result<()> {
        let rv = self.bump_rowversion();
        let t = self
            .tables
            .get_mut(k)
            .ok_or_else(|| anyhow!("Invalid object name '{}.{}'", k.0, k.1))?;

        let mut row: Vec<SqlValue> = t
            .columns
            .iter()
            .map(|_| SqlValue::Null(SqlKind::String))
            .collect();
        for (name, value) in columns.iter().zip(values) {
            let pos = t.position(name)?;
            let col = &t.columns[pos];
            if col.is_computed || col.is_rowversion() || (col.is_identity && !allow_identity) {
                bail!("Cannot insert an explicit value into column '{}'", name);
            }
            row[pos] = value;
        }
        for (pos, col) in t.columns.iter().enumerate() {
            if col.is_identity && !columns.contains(&col.name) {
                let next = t
                    .rows
                    .iter()
                    .filter_map(|r| r[pos].as_i64())
                    .max()
                    .map(|m| m + col.identity_increment)
                    .unwrap_or(col.identity_seed);
                row[pos] = SqlValue::I32(next as i32);
            }
            if col.is_rowversion() {
                row[pos] = rv.clone();
            }
        }

        if !t.primary_key.is_empty() {
            let new_key = t.key_of(&row)?;
            for existing in &t.rows {
                if t.key_of(existing)? == new_key {
                    bail!("Violation of PRIMARY KEY constraint: duplicate key {:?}", new_key);
                }
            }
        }
        t.rows.push(row);
        Ok(())
    }

    fn run_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        if sql.contains("SyncMetadata") {
            return self.ledger_query(sql, params);
        }
        if sql.contains("sys.identity_columns") {
            return self.catalog_columns(params);
        }
        if sql.contains("kc.type = 'PK'") {
            return self.catalog_primary_key(params);
        }
        if sql.contains("sys.") {
            return Ok(Vec::new());
        }

        let body = sql
            .strip_prefix("SELECT ")
            .ok_or_else(|| anyhow!("unsupported query: {}", sql))?;
        let (list, rest) = body
            .split_once(" FROM ")
            .ok_or_else(|| anyhow!("unsupported query: {}", sql))?;
        let (k, after) = parse_qualified(rest).ok_or_else(|| anyhow!("bad table in {}", sql))?;
        let t = self.lookup(&k)?;
        let filter = match after.trim().strip_prefix("WHERE ") {
            Some(predicate) => Some(Filter::parse(predicate)?),
            None => None,
        };
        let matching: Vec<&Vec<SqlValue>> = t
            .rows
            .iter()
            .filter(|r| match &filter {
                Some(f) => f.matches(t, r),
                None => true,
            })
            .collect();

        if let Some(inner) = list.strip_prefix("MAX(") {
            let (name, _) = parse_ident(inner).ok_or_else(|| anyhow!("bad MAX in {}", sql))?;
            let pos = t.position(&name)?;
            let max = matching
                .iter()
                .filter_map(|r| match &r[pos] {
                    SqlValue::Binary(b) => Some(b.clone()),
                    _ => None,
                })
                .max();
            let value = max.map(SqlValue::Binary).unwrap_or(SqlValue::Null(SqlKind::Binary));
            return Ok(vec![Row::new(vec![value])]);
        }

        let positions = parse_ident_list(list)
            .iter()
            .map(|c| t.position(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(matching
            .into_iter()
            .map(|r| Row::new(positions.iter().map(|&i| r[i].clone()).collect()))
            .collect())
    }

    fn run_statement(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.statements.push(sql.to_string());
        if sql.contains("SyncMetadata") {
            return self.ledger_statement(sql, params);
        }

        if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            let (k, after) = parse_qualified(rest).ok_or_else(|| anyhow!("bad INSERT"))?;
            let open = after.find('(').ok_or_else(|| anyhow!("bad INSERT"))?;
            let close = after.find(')').ok_or_else(|| anyhow!("bad INSERT"))?;
            let columns = parse_ident_list(&after[open + 1..close]);
            let mut inserted = 0;
            for values in params.chunks(columns.len()) {
                self.insert_row(&k, &columns, values.to_vec(), false)?;
                inserted += 1;
            }
            return Ok(inserted);
        }

        if let Some(rest) = sql.strip_prefix("UPDATE ") {
            let (k, after) = parse_qualified(rest).ok_or_else(|| anyhow!("bad UPDATE"))?;
            let body = after.trim().strip_prefix("SET ").ok_or_else(|| anyhow!("bad UPDATE"))?;
            let (set, predicate) = body.split_once(" WHERE ").ok_or_else(|| anyhow!("bad UPDATE"))?;
            let assignments = parse_assignments(set, ", ", params)?;
            let conditions = parse_assignments(predicate, " AND ", params)?;
            let rv = self.bump_rowversion();
            let t = self.tables.get_mut(&k).ok_or_else(|| anyhow!("no table"))?;
            let set_pos = resolve(t, &assignments)?;
            let cond_pos = resolve(t, &conditions)?;
            let rv_pos = t.columns.iter().position(|c| c.is_rowversion());
            let mut affected = 0;
            for row in t.rows.iter_mut() {
                if cond_pos.iter().all(|(i, v)| &row[*i] == v) {
                    for (i, v) in &set_pos {
                        row[*i] = v.clone();
                    }
                    if let Some(p) = rv_pos {
                        row[p] = rv.clone();
                    }
                    affected += 1;
                }
            }
            return Ok(affected);
        }

        if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            let (k, after) = parse_qualified(rest).ok_or_else(|| anyhow!("bad DELETE"))?;
            let predicate = after
                .trim()
                .strip_prefix("WHERE ")
                .ok_or_else(|| anyhow!("bad DELETE"))?;
            let conditions = parse_assignments(predicate, " AND ", params)?;
            let t = self.tables.get_mut(&k).ok_or_else(|| anyhow!("no table"))?;
            let cond_pos = resolve(t, &conditions)?;
            let before = t.rows.len();
            t.rows.retain(|row| !cond_pos.iter().all(|(i, v)| &row[*i] == v));
            return Ok((before - t.rows.len()) as u64);
        }

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let (k, after) = parse_qualified(rest).ok_or_else(|| anyhow!("bad CREATE TABLE"))?;
            if self.tables.contains_key(&k) {
                bail!("There is already an object named '{}' in the database", k.1);
            }
            let mut columns = Vec::new();
            for line in after.lines().map(str::trim).filter(|l| l.starts_with('[')) {
                let line = line.trim_end_matches(',');
                let (name, rest) = parse_ident(line).ok_or_else(|| anyhow!("bad column"))?;
                let id = columns.len() as i32 + 1;
                if let Some(expr) = rest.strip_prefix(" AS ") {
                    columns.push(computed(ColumnDefinition::new(id, &name, "int", true), expr));
                    continue;
                }
                let (type_name, _) =
                    parse_ident(rest.trim_start()).ok_or_else(|| anyhow!("bad type"))?;
                let nullable = !line.ends_with("NOT NULL");
                let mut col = column(id, &name, &type_name, nullable);
                if line.contains(" IDENTITY(") {
                    col = identity(col);
                }
                columns.push(col);
            }
            self.create_table(&k.0, &k.1, columns);
            return Ok(0);
        }

        if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            if let Some(idx) = rest.find("PRIMARY KEY") {
                let (k, _) = parse_qualified(rest).ok_or_else(|| anyhow!("bad ALTER"))?;
                let cols = &rest[idx..];
                let open = cols.find('(').ok_or_else(|| anyhow!("bad PK"))?;
                let close = cols.find(')').ok_or_else(|| anyhow!("bad PK"))?;
                let names = parse_ident_list(&cols[open + 1..close]);
                let t = self.tables.get_mut(&k).ok_or_else(|| anyhow!("no table"))?;
                t.primary_key = names;
            }
            return Ok(0);
        }

        if sql.starts_with("CREATE ") {
            return Ok(0);
        }

        bail!("unsupported statement: {}", sql)
    }

    fn execute_atomic(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.check_failure(sql)?;
        let before = self.tables.clone();
        match self.run_statement(sql, params) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.tables = before;
                Err(e)
            }
        }
    }

    fn catalog_columns(&self, params: &[SqlValue]) -> Result<Vec<Row>> {
        let object_id = params[0].as_i64().ok_or_else(|| anyhow!("object_id"))? as i32;
        let Some(t) = self.table_by_id(object_id) else {
            return Ok(Vec::new());
        };
        Ok(t.columns
            .iter()
            .map(|c| {
                Row::new(vec![
                    SqlValue::I32(c.column_id),
                    SqlValue::from(c.name.as_str()),
                    SqlValue::from(c.type_name.as_str()),
                    SqlValue::I32(c.max_length),
                    SqlValue::U8(c.precision),
                    SqlValue::U8(c.scale),
                    SqlValue::Bool(c.is_nullable),
                    SqlValue::Bool(c.is_identity),
                    SqlValue::Bool(c.is_computed),
                    SqlValue::Bool(c.is_rowguidcol),
                    SqlValue::I64(c.identity_seed),
                    SqlValue::I64(c.identity_increment),
                    SqlValue::opt_string(c.collation_name.as_deref()),
                    SqlValue::opt_string(c.computed_definition.as_deref()),
                    SqlValue::Bool(c.computed_is_persisted),
                ])
            })
            .collect())
    }

    fn catalog_primary_key(&self, params: &[SqlValue]) -> Result<Vec<Row>> {
        let object_id = params[0].as_i64().ok_or_else(|| anyhow!("object_id"))? as i32;
        let Some(t) = self.table_by_id(object_id) else {
            return Ok(Vec::new());
        };
        Ok(t.primary_key
            .iter()
            .map(|c| {
                Row::new(vec![
                    SqlValue::from("PK_fake"),
                    SqlValue::Bool(true),
                    SqlValue::from(c.as_str()),
                    SqlValue::Bool(false),
                ])
            })
            .collect())
    }

    fn ledger_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        if !self.ledger_created {
            bail!("Invalid object name 'SyncMetadata'");
        }
        if sql.contains("WHERE schema_name = @P1") {
            let k = (param_string(params, 0)?, param_string(params, 1)?);
            return Ok(self
                .ledger
                .get(&k)
                .map(|e| vec![ledger_row(&k, e)])
                .unwrap_or_default());
        }

        let mut entries: Vec<(&TableKey, &LedgerEntry)> = self.ledger.iter().collect();
        entries.sort_by(|a, b| b.1.last_sync_date.cmp(&a.1.last_sync_date));
        Ok(entries
            .into_iter()
            .map(|(k, e)| {
                Row::new(vec![
                    SqlValue::from(k.0.as_str()),
                    SqlValue::from(k.1.as_str()),
                    SqlValue::opt_string(e.strategy.as_deref()),
                    e.last_sync_date
                        .map(SqlValue::DateTime)
                        .unwrap_or(SqlValue::Null(SqlKind::DateTime)),
                    SqlValue::opt_string(e.last_sync_status.as_deref()),
                    SqlValue::I64(e.records_inserted),
                    SqlValue::I64(e.records_updated),
                    SqlValue::I64(e.records_deleted),
                    SqlValue::opt_string(e.last_error_message.as_deref()),
                ])
            })
            .collect())
    }

    fn ledger_statement(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        if sql.starts_with("IF NOT EXISTS") {
            self.ledger_created = true;
            return Ok(0);
        }
        if !self.ledger_created {
            bail!("Invalid object name 'SyncMetadata'");
        }
        let now = self.now();

        if sql.starts_with("MERGE") {
            let k = (param_string(params, 0)?, param_string(params, 1)?);
            let next_id = self.ledger.len() as i64 + 1;
            let entry = self.ledger.entry(k).or_insert_with(|| LedgerEntry {
                id: next_id,
                created_date: Some(now),
                ..Default::default()
            });
            entry.primary_key_columns = param_opt_string(params, 2);
            entry.pk_auto_detected = params[3].as_bool().unwrap_or(false);
            entry.where_clause = param_opt_string(params, 4);
            entry.strategy = param_opt_string(params, 5);
            entry.rowversion_column = param_opt_string(params, 6);
            entry.modified_date = Some(now);
            return Ok(1);
        }

        if sql.contains("last_sync_status = @P1") {
            let k = (param_string(params, 5)?, param_string(params, 6)?);
            let Some(entry) = self.ledger.get_mut(&k) else {
                return Ok(0);
            };
            entry.last_sync_date = Some(now);
            entry.last_sync_status = param_opt_string(params, 0);
            entry.records_inserted += params[1].as_i64().unwrap_or(0);
            entry.records_updated += params[2].as_i64().unwrap_or(0);
            entry.records_deleted += params[3].as_i64().unwrap_or(0);
            entry.last_error_message = param_opt_string(params, 4);
            if entry.last_error_message.is_some() {
                entry.last_error_date = Some(now);
            }
            entry.modified_date = Some(now);
            return Ok(1);
        }

        if sql.contains("last_rowversion_synced = @P1") {
            let k = (param_string(params, 1)?, param_string(params, 2)?);
            let Some(entry) = self.ledger.get_mut(&k) else {
                return Ok(0);
            };
            entry.last_rowversion_synced = match &params[0] {
                SqlValue::Binary(b) => Some(b.clone()),
                _ => None,
            };
            return Ok(1);
        }

        if sql.contains("last_hash_synced = @P1") {
            let k = (param_string(params, 1)?, param_string(params, 2)?);
            let Some(entry) = self.ledger.get_mut(&k) else {
                return Ok(0);
            };
            entry.last_hash_synced = param_opt_string(params, 0);
            return Ok(1);
        }

        if sql.contains("records_inserted = 0") {
            let k = (param_string(params, 0)?, param_string(params, 1)?);
            let Some(entry) = self.ledger.get_mut(&k) else {
                return Ok(0);
            };
            entry.last_rowversion_synced = None;
            entry.last_hash_synced = None;
            entry.records_inserted = 0;
            entry.records_updated = 0;
            entry.records_deleted = 0;
            entry.last_error_message = None;
            entry.last_error_date = None;
            entry.modified_date = Some(now);
            return Ok(1);
        }

        bail!("unsupported ledger statement: {}", sql)
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.check_failure(sql)?;
        self.run_query(sql, params)
    }

    async fn execute_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let rows = self.execute_query(sql, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|r| r.into_values().into_iter().next())
            .filter(|v| !v.is_null()))
    }

    async fn execute_non_query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        commit: bool,
    ) -> Result<u64> {
        let affected = self.execute_atomic(sql, params)?;
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
        let owned = !self.in_transaction;
        if owned {
            self.begin_transaction().await?;
        }
        let mut affected = 0;
        for params in rows {
            match self.execute_atomic(sql, params) {
                Ok(n) => affected += n,
                Err(e) => {
                    if owned {
                        self.rollback().await?;
                    }
                    return Err(e);
                }
            }
        }
        if commit {
            self.commit().await?;
        }
        Ok(affected)
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(&key(schema, table)))
    }

    async fn get_table_object_id(&mut self, schema: &str, table: &str) -> Result<Option<i32>> {
        self.check_failure("get_table_object_id")?;
        Ok(self.tables.get(&key(schema, table)).map(|t| t.object_id))
    }

    async fn get_tables(&mut self) -> Result<Vec<TableInfo>> {
        Ok(self
            .tables
            .iter()
            .map(|((schema, table), t)| TableInfo {
                schema: schema.clone(),
                table: table.clone(),
                object_id: t.object_id,
                row_count: t.rows.len() as i64,
            })
            .collect())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            bail!("transaction already open");
        }
        self.snapshot = Some(self.tables.clone());
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.commits += 1;
        }
        self.snapshot = None;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
            self.rollbacks += 1;
        }
        self.in_transaction = false;
        Ok(())
    }
}

fn key(schema: &str, table: &str) -> TableKey {
    (schema.to_string(), table.to_string())
}

fn ledger_row(k: &TableKey, e: &LedgerEntry) -> Row {
    let date = |d: Option<NaiveDateTime>| {
        d.map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlKind::DateTime))
    };
    Row::new(vec![
        SqlValue::I32(e.id as i32),
        SqlValue::from(k.0.as_str()),
        SqlValue::from(k.1.as_str()),
        SqlValue::opt_string(e.primary_key_columns.as_deref()),
        SqlValue::Bool(e.pk_auto_detected),
        SqlValue::opt_string(e.where_clause.as_deref()),
        SqlValue::opt_string(e.strategy.as_deref()),
        SqlValue::opt_string(e.rowversion_column.as_deref()),
        e.last_rowversion_synced
            .clone()
            .map(SqlValue::Binary)
            .unwrap_or(SqlValue::Null(SqlKind::Binary)),
        SqlValue::opt_string(e.last_hash_synced.as_deref()),
        date(e.last_sync_date),
        SqlValue::opt_string(e.last_sync_status.as_deref()),
        SqlValue::I64(e.records_inserted),
        SqlValue::I64(e.records_updated),
        SqlValue::I64(e.records_deleted),
        SqlValue::opt_string(e.last_error_message.as_deref()),
        date(e.last_error_date),
        date(e.created_date),
        date(e.modified_date),
    ])
}

fn param_string(params: &[SqlValue], i: usize) -> Result<String> {
    params
        .get(i)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow!("expected string parameter @P{}", i + 1))
}

fn param_opt_string(params: &[SqlValue], i: usize) -> Option<String> {
    params.get(i).and_then(|v| v.as_str()).map(String::from)
}

/// `[name]rest` -> (name, rest)
fn parse_ident(s: &str) -> Option<(String, &str)> {
    let s = s.strip_prefix('[')?;
    let end = s.find(']')?;
    Some((s[..end].to_string(), &s[end + 1..]))
}

/// `[schema].[table]rest` -> ((schema, table), rest)
fn parse_qualified(s: &str) -> Option<(TableKey, &str)> {
    let (schema, rest) = parse_ident(s.trim_start())?;
    let (table, rest) = parse_ident(rest.strip_prefix('.')?)?;
    Some(((schema, table), rest))
}

/// `[a], [b] DESC` -> [a, b]
fn parse_ident_list(s: &str) -> Vec<String> {
    s.split(',')
        .filter_map(|part| parse_ident(part.trim()).map(|(name, _)| name))
        .collect()
}

/// `[a] = @P1, [b] = @P2` -> [(a, value of @P1), (b, value of @P2)]
fn parse_assignments(
    s: &str,
    separator: &str,
    params: &[SqlValue],
) -> Result<Vec<(String, SqlValue)>> {
    s.split(separator)
        .map(|part| {
            let (name, rest) =
                parse_ident(part.trim()).ok_or_else(|| anyhow!("bad assignment {}", part))?;
            let index: usize = rest
                .trim()
                .strip_prefix("= @P")
                .ok_or_else(|| anyhow!("bad assignment {}", part))?
                .parse()?;
            let value = params
                .get(index - 1)
                .cloned()
                .ok_or_else(|| anyhow!("missing parameter @P{}", index))?;
            Ok((name, value))
        })
        .collect()
}

fn resolve(t: &FakeTable, pairs: &[(String, SqlValue)]) -> Result<Vec<(usize, SqlValue)>> {
    pairs
        .iter()
        .map(|(name, value)| Ok((t.position(name)?, value.clone())))
        .collect()
}

/// `column = 'literal'`, `column <> 5` and similar single comparisons.
struct Filter {
    column: String,
    op: String,
    literal: SqlValue,
}

impl Filter {
    fn parse(predicate: &str) -> Result<Self> {
        let mut parts = predicate.trim().splitn(3, ' ');
        let column = parts.next().unwrap_or_default();
        let op = parts.next().ok_or_else(|| anyhow!("bad filter {}", predicate))?;
        let literal = parts.next().ok_or_else(|| anyhow!("bad filter {}", predicate))?.trim();
        let column = column.trim_start_matches('[').trim_end_matches(']').to_string();
        let literal = if let Some(s) = literal.strip_prefix('\'') {
            SqlValue::from(s.trim_end_matches('\''))
        } else {
            SqlValue::I64(literal.parse()?)
        };
        Ok(Self {
            column,
            op: op.to_string(),
            literal,
        })
    }

    fn matches(&self, t: &FakeTable, row: &[SqlValue]) -> bool {
        let Ok(pos) = t.position(&self.column) else {
            return false;
        };
        let value = &row[pos];
        let ordering = match (&self.literal, value) {
            (SqlValue::String(lit), SqlValue::String(v)) => v.as_str().cmp(lit.as_str()),
            (SqlValue::I64(lit), v) => match v.as_i64() {
                Some(v) => v.cmp(lit),
                None => return false,
            },
            _ => return false,
        };
        match self.op.as_str() {
            "=" => ordering.is_eq(),
            "<>" => ordering.is_ne(),
            ">" => ordering.is_gt(),
            "<" => ordering.is_lt(),
            ">=" => ordering.is_ge(),
            "<=" => ordering.is_le(),
            _ => false,
        }
    }
}
