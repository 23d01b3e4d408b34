// ABOUTME: Reads a table's full structural definition from the SQL Server catalog views
// ABOUTME: Columns, keys, indexes, foreign keys and constraints; triggers are never read

use anyhow::{Context, Result};

use super::{
    CheckConstraint, ColumnDefinition, DefaultConstraint, ForeignKeyColumn, ForeignKeyDefinition,
    IndexColumn, IndexDefinition, PrimaryKeyDefinition, ReferentialAction, TableDefinition,
    UniqueConstraint,
};
use crate::db::{Executor, SqlValue};
use crate::error::SyncError;
use crate::utils::qualified_name;

pub(crate) const COLUMNS_QUERY: &str = "\
SELECT
    c.column_id,
    c.name,
    t.name AS type_name,
    CAST(c.max_length AS INT),
    c.precision,
    c.scale,
    c.is_nullable,
    c.is_identity,
    c.is_computed,
    c.is_rowguidcol,
    CAST(ISNULL(ic.seed_value, 0) AS BIGINT),
    CAST(ISNULL(ic.increment_value, 0) AS BIGINT),
    c.collation_name,
    cc.definition,
    CAST(ISNULL(cc.is_persisted, 0) AS BIT)
FROM sys.columns c
INNER JOIN sys.types t ON c.user_type_id = t.user_type_id
LEFT JOIN sys.identity_columns ic ON c.object_id = ic.object_id AND c.column_id = ic.column_id
LEFT JOIN sys.computed_columns cc ON c.object_id = cc.object_id AND c.column_id = cc.column_id
WHERE c.object_id = @P1
ORDER BY c.column_id";

pub(crate) const PRIMARY_KEY_QUERY: &str = "\
SELECT
    kc.name,
    CAST(CASE WHEN i.type = 1 THEN 1 ELSE 0 END AS BIT),
    c.name,
    ic.is_descending_key
FROM sys.key_constraints kc
INNER JOIN sys.indexes i ON kc.parent_object_id = i.object_id AND kc.unique_index_id = i.index_id
INNER JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
INNER JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
WHERE kc.parent_object_id = @P1 AND kc.type = 'PK'
ORDER BY ic.key_ordinal";

// Indexes behind UNIQUE constraints are recreated by the constraint itself.
const INDEXES_QUERY: &str = "\
SELECT
    i.index_id,
    i.name,
    i.is_unique,
    CAST(CASE WHEN i.type = 1 THEN 1 ELSE 0 END AS BIT),
    i.fill_factor,
    i.filter_definition,
    ic.is_descending_key,
    ic.is_included_column,
    c.name
FROM sys.indexes i
INNER JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
INNER JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
WHERE i.object_id = @P1
    AND i.is_primary_key = 0
    AND i.is_unique_constraint = 0
    AND i.type IN (1, 2)
ORDER BY i.index_id, ic.is_included_column, ic.key_ordinal, ic.index_column_id";

const FOREIGN_KEYS_QUERY: &str = "\
SELECT
    fk.name,
    fk.delete_referential_action_desc,
    fk.update_referential_action_desc,
    fk.is_disabled,
    SCHEMA_NAME(ref_t.schema_id),
    ref_t.name,
    parent_col.name,
    ref_col.name
FROM sys.foreign_keys fk
INNER JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id
INNER JOIN sys.columns parent_col ON fkc.parent_object_id = parent_col.object_id
    AND fkc.parent_column_id = parent_col.column_id
INNER JOIN sys.columns ref_col ON fkc.referenced_object_id = ref_col.object_id
    AND fkc.referenced_column_id = ref_col.column_id
INNER JOIN sys.tables ref_t ON fkc.referenced_object_id = ref_t.object_id
WHERE fk.parent_object_id = @P1
ORDER BY fk.name, fkc.constraint_column_id";

const CHECK_CONSTRAINTS_QUERY: &str = "\
SELECT cc.name, cc.definition, cc.is_disabled
FROM sys.check_constraints cc
WHERE cc.parent_object_id = @P1
ORDER BY cc.name";

const DEFAULT_CONSTRAINTS_QUERY: &str = "\
SELECT dc.name, c.name, dc.definition
FROM sys.default_constraints dc
INNER JOIN sys.columns c ON dc.parent_object_id = c.object_id AND dc.parent_column_id = c.column_id
WHERE dc.parent_object_id = @P1
ORDER BY c.column_id";

const UNIQUE_CONSTRAINTS_QUERY: &str = "\
SELECT kc.name, c.name
FROM sys.key_constraints kc
INNER JOIN sys.indexes i ON kc.parent_object_id = i.object_id AND kc.unique_index_id = i.index_id
INNER JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
INNER JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
WHERE kc.parent_object_id = @P1 AND kc.type = 'UQ'
ORDER BY kc.name, ic.key_ordinal";

/// Reads table definitions from a source database.
pub struct SchemaExtractor<'a> {
    db: &'a mut dyn Executor,
}

impl<'a> SchemaExtractor<'a> {
    pub fn new(db: &'a mut dyn Executor) -> Self {
        Self { db }
    }

    /// Read the complete definition of `schema.table`.
    ///
    /// Returns [`SyncError::NotFound`] when the table does not exist.
    pub async fn get_table_definition(
        &mut self,
        schema: &str,
        table: &str,
    ) -> crate::error::Result<TableDefinition> {
        let object_id = self
            .db
            .get_table_object_id(schema, table)
            .await?
            .ok_or_else(|| SyncError::NotFound(qualified_name(schema, table)))?;

        tracing::debug!(
            "Extracting definition of {} (object_id {})",
            qualified_name(schema, table),
            object_id
        );

        let definition = TableDefinition {
            schema: schema.to_string(),
            table: table.to_string(),
            object_id,
            columns: self.columns(object_id).await?,
            primary_key: self.primary_key(object_id).await?,
            indexes: self.indexes(object_id).await?,
            foreign_keys: self.foreign_keys(object_id).await?,
            check_constraints: self.check_constraints(object_id).await?,
            default_constraints: self.default_constraints(object_id).await?,
            unique_constraints: self.unique_constraints(object_id).await?,
        };
        Ok(definition)
    }

    pub async fn columns(&mut self, object_id: i32) -> Result<Vec<ColumnDefinition>> {
        let rows = self
            .db
            .execute_query(COLUMNS_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read column definitions")?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDefinition {
                    column_id: i32::try_from(row.get_i64(0)?)?,
                    name: row.get_string(1)?,
                    type_name: row.get_string(2)?,
                    max_length: i32::try_from(row.get_i64(3)?)?,
                    precision: u8::try_from(row.get_i64(4)?)?,
                    scale: u8::try_from(row.get_i64(5)?)?,
                    is_nullable: row.get_bool(6)?,
                    is_identity: row.get_bool(7)?,
                    is_computed: row.get_bool(8)?,
                    is_rowguidcol: row.get_bool(9)?,
                    identity_seed: row.get_i64(10)?,
                    identity_increment: row.get_i64(11)?,
                    collation_name: row.get_opt_string(12)?,
                    computed_definition: row.get_opt_string(13)?,
                    computed_is_persisted: row.get_bool(14)?,
                })
            })
            .collect()
    }

    pub async fn primary_key(&mut self, object_id: i32) -> Result<Option<PrimaryKeyDefinition>> {
        let rows = self
            .db
            .execute_query(PRIMARY_KEY_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read primary key")?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let mut pk = PrimaryKeyDefinition {
            name: first.get_string(0)?,
            is_clustered: first.get_bool(1)?,
            columns: Vec::with_capacity(rows.len()),
        };
        for row in &rows {
            pk.columns.push(IndexColumn {
                name: row.get_string(2)?,
                is_descending: row.get_bool(3)?,
            });
        }
        Ok(Some(pk))
    }

    async fn indexes(&mut self, object_id: i32) -> Result<Vec<IndexDefinition>> {
        let rows = self
            .db
            .execute_query(INDEXES_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read indexes")?;

        let mut indexes: Vec<(i64, IndexDefinition)> = Vec::new();
        for row in &rows {
            let index_id = row.get_i64(0)?;
            if indexes.last().map(|(id, _)| *id) != Some(index_id) {
                indexes.push((
                    index_id,
                    IndexDefinition {
                        name: row.get_string(1)?,
                        is_unique: row.get_bool(2)?,
                        is_clustered: row.get_bool(3)?,
                        key_columns: Vec::new(),
                        included_columns: Vec::new(),
                        filter_definition: row.get_opt_string(5)?,
                        fill_factor: u8::try_from(row.get_i64(4)?)?,
                    },
                ));
            }
            if let Some((_, index)) = indexes.last_mut() {
                let column = row.get_string(8)?;
                if row.get_bool(7)? {
                    index.included_columns.push(column);
                } else {
                    index.key_columns.push(IndexColumn {
                        name: column,
                        is_descending: row.get_bool(6)?,
                    });
                }
            }
        }
        Ok(indexes.into_iter().map(|(_, index)| index).collect())
    }

    async fn foreign_keys(&mut self, object_id: i32) -> Result<Vec<ForeignKeyDefinition>> {
        let rows = self
            .db
            .execute_query(FOREIGN_KEYS_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read foreign keys")?;

        let mut foreign_keys: Vec<ForeignKeyDefinition> = Vec::new();
        for row in &rows {
            let name = row.get_string(0)?;
            if foreign_keys.last().map(|fk| fk.name.as_str()) != Some(name.as_str()) {
                foreign_keys.push(ForeignKeyDefinition {
                    name,
                    on_delete: ReferentialAction::from_desc(&row.get_string(1)?),
                    on_update: ReferentialAction::from_desc(&row.get_string(2)?),
                    is_disabled: row.get_bool(3)?,
                    referenced_schema: row.get_string(4)?,
                    referenced_table: row.get_string(5)?,
                    columns: Vec::new(),
                });
            }
            if let Some(fk) = foreign_keys.last_mut() {
                fk.columns.push(ForeignKeyColumn {
                    parent: row.get_string(6)?,
                    referenced: row.get_string(7)?,
                });
            }
        }
        Ok(foreign_keys)
    }

    async fn check_constraints(&mut self, object_id: i32) -> Result<Vec<CheckConstraint>> {
        let rows = self
            .db
            .execute_query(CHECK_CONSTRAINTS_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read check constraints")?;

        rows.iter()
            .map(|row| {
                Ok(CheckConstraint {
                    name: row.get_string(0)?,
                    definition: row.get_string(1)?,
                    is_disabled: row.get_bool(2)?,
                })
            })
            .collect()
    }

    async fn default_constraints(&mut self, object_id: i32) -> Result<Vec<DefaultConstraint>> {
        let rows = self
            .db
            .execute_query(DEFAULT_CONSTRAINTS_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read default constraints")?;

        rows.iter()
            .map(|row| {
                Ok(DefaultConstraint {
                    name: row.get_string(0)?,
                    column: row.get_string(1)?,
                    definition: row.get_string(2)?,
                })
            })
            .collect()
    }

    async fn unique_constraints(&mut self, object_id: i32) -> Result<Vec<UniqueConstraint>> {
        let rows = self
            .db
            .execute_query(UNIQUE_CONSTRAINTS_QUERY, &[SqlValue::I32(object_id)])
            .await
            .context("Failed to read unique constraints")?;

        let mut uniques: Vec<UniqueConstraint> = Vec::new();
        for row in &rows {
            let name = row.get_string(0)?;
            let column = row.get_string(1)?;
            match uniques.last_mut() {
                Some(uq) if uq.name == name => uq.columns.push(column),
                _ => uniques.push(UniqueConstraint {
                    name,
                    columns: vec![column],
                }),
            }
        }
        Ok(uniques)
    }
}
