// ABOUTME: Structural model of a SQL Server table used for perfect-mirror creation
// ABOUTME: Extracted from the source catalog and rendered back to DDL by the builder

pub mod builder;
pub mod extractor;

pub use builder::{build, render_script, DdlSection, DdlStatement};
pub use extractor::SchemaExtractor;

use crate::utils::qualified_name;

/// Full structural definition of one table. Transient: never cached or persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub schema: String,
    pub table: String,
    pub object_id: i32,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<PrimaryKeyDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub check_constraints: Vec<CheckConstraint>,
    pub default_constraints: Vec<DefaultConstraint>,
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl TableDefinition {
    /// `[schema].[table]`
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns a client may write: everything except computed, identity and rowversion columns.
    pub fn insertable_columns(&self) -> Vec<String> {
        insertable_columns(&self.columns)
    }
}

/// Names of the writable columns among `columns`, in column order.
pub fn insertable_columns(columns: &[ColumnDefinition]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.is_insertable())
        .map(|c| c.name.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnDefinition {
    pub column_id: i32,
    pub name: String,
    pub type_name: String,
    /// Storage length in bytes; `-1` means `MAX`.
    pub max_length: i32,
    pub precision: u8,
    pub scale: u8,
    pub is_nullable: bool,
    pub is_identity: bool,
    pub identity_seed: i64,
    pub identity_increment: i64,
    pub is_computed: bool,
    pub computed_definition: Option<String>,
    pub computed_is_persisted: bool,
    pub is_rowguidcol: bool,
    pub collation_name: Option<String>,
}

impl ColumnDefinition {
    /// A plain nullable or non-nullable column of `type_name`.
    pub fn new(column_id: i32, name: &str, type_name: &str, is_nullable: bool) -> Self {
        Self {
            column_id,
            name: name.to_string(),
            type_name: type_name.to_string(),
            is_nullable,
            ..Default::default()
        }
    }

    pub fn is_rowversion(&self) -> bool {
        matches!(self.type_name.as_str(), "timestamp" | "rowversion")
    }

    pub fn is_insertable(&self) -> bool {
        !self.is_computed && !self.is_identity && !self.is_rowversion()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub is_descending: bool,
}

impl IndexColumn {
    pub fn asc(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_descending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyDefinition {
    pub name: String,
    pub is_clustered: bool,
    /// Key columns in key-ordinal order.
    pub columns: Vec<IndexColumn>,
}

impl PrimaryKeyDefinition {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A non-PK rowstore index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub is_unique: bool,
    pub is_clustered: bool,
    pub key_columns: Vec<IndexColumn>,
    pub included_columns: Vec<String>,
    pub filter_definition: Option<String>,
    /// `0` means the server default.
    pub fill_factor: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse a `sys.foreign_keys` `*_referential_action_desc` value.
    pub fn from_desc(desc: &str) -> Self {
        match desc {
            "CASCADE" => ReferentialAction::Cascade,
            "SET_NULL" => ReferentialAction::SetNull,
            "SET_DEFAULT" => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumn {
    pub parent: String,
    pub referenced: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub columns: Vec<ForeignKeyColumn>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub is_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConstraint {
    pub name: String,
    pub definition: String,
    pub is_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultConstraint {
    pub name: String,
    pub column: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}
