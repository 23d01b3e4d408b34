// ABOUTME: Renders a TableDefinition into ordered DDL statements for the destination
// ABOUTME: Table, primary key, unique, defaults, checks, indexes, then foreign keys

use std::fmt;

use super::{ColumnDefinition, IndexColumn, TableDefinition};
use crate::utils::{qualified_name, quote_ident};

/// The creation step a statement belongs to. Variants are in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DdlSection {
    Table,
    PrimaryKey,
    UniqueConstraints,
    DefaultConstraints,
    CheckConstraints,
    Indexes,
    ForeignKeys,
}

impl fmt::Display for DdlSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DdlSection::Table => "Table",
            DdlSection::PrimaryKey => "Primary key",
            DdlSection::UniqueConstraints => "Unique constraints",
            DdlSection::DefaultConstraints => "Default constraints",
            DdlSection::CheckConstraints => "Check constraints",
            DdlSection::Indexes => "Indexes",
            DdlSection::ForeignKeys => "Foreign keys",
        };
        f.write_str(label)
    }
}

/// One executable DDL batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    pub section: DdlSection,
    pub sql: String,
}

impl DdlStatement {
    fn new(section: DdlSection, sql: String) -> Self {
        Self { section, sql }
    }
}

/// Render every statement needed to recreate `def`, in dependency order.
///
/// Foreign keys come last so that everything they may reference on this table
/// already exists. Disabled constraints are created and then immediately marked
/// `NOCHECK` to preserve their state.
pub fn build(def: &TableDefinition) -> Vec<DdlStatement> {
    let table = def.qualified_name();
    let mut statements = vec![DdlStatement::new(DdlSection::Table, create_table(def))];

    if let Some(pk) = &def.primary_key {
        statements.push(DdlStatement::new(
            DdlSection::PrimaryKey,
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY {} ({})",
                table,
                quote_ident(&pk.name),
                clustering(pk.is_clustered),
                key_list(&pk.columns)
            ),
        ));
    }

    for uq in &def.unique_constraints {
        let columns = uq
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(DdlStatement::new(
            DdlSection::UniqueConstraints,
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                table,
                quote_ident(&uq.name),
                columns
            ),
        ));
    }

    for df in &def.default_constraints {
        statements.push(DdlStatement::new(
            DdlSection::DefaultConstraints,
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {}",
                table,
                quote_ident(&df.name),
                df.definition,
                quote_ident(&df.column)
            ),
        ));
    }

    for chk in &def.check_constraints {
        statements.push(DdlStatement::new(
            DdlSection::CheckConstraints,
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} CHECK {}",
                table,
                quote_ident(&chk.name),
                chk.definition
            ),
        ));
        if chk.is_disabled {
            statements.push(DdlStatement::new(
                DdlSection::CheckConstraints,
                nocheck(&table, &chk.name),
            ));
        }
    }

    for idx in &def.indexes {
        let mut sql = format!(
            "CREATE {}{} INDEX {} ON {} ({})",
            if idx.is_unique { "UNIQUE " } else { "" },
            clustering(idx.is_clustered),
            quote_ident(&idx.name),
            table,
            key_list(&idx.key_columns)
        );
        if !idx.included_columns.is_empty() {
            let included = idx
                .included_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" INCLUDE ({})", included));
        }
        if let Some(filter) = &idx.filter_definition {
            sql.push_str(&format!(" WHERE {}", filter));
        }
        if idx.fill_factor > 0 {
            sql.push_str(&format!(" WITH (FILLFACTOR = {})", idx.fill_factor));
        }
        statements.push(DdlStatement::new(DdlSection::Indexes, sql));
    }

    for fk in &def.foreign_keys {
        let parent = fk
            .columns
            .iter()
            .map(|c| quote_ident(&c.parent))
            .collect::<Vec<_>>()
            .join(", ");
        let referenced = fk
            .columns
            .iter()
            .map(|c| quote_ident(&c.referenced))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            table,
            quote_ident(&fk.name),
            parent,
            qualified_name(&fk.referenced_schema, &fk.referenced_table),
            referenced
        );
        sql.push_str(&format!(" ON DELETE {}", fk.on_delete.as_sql()));
        sql.push_str(&format!(" ON UPDATE {}", fk.on_update.as_sql()));
        statements.push(DdlStatement::new(DdlSection::ForeignKeys, sql));
        if fk.is_disabled {
            statements.push(DdlStatement::new(
                DdlSection::ForeignKeys,
                nocheck(&table, &fk.name),
            ));
        }
    }

    statements
}

/// Join the statements for `def` into one `GO`-separated script, for review or manual runs.
pub fn render_script(def: &TableDefinition) -> String {
    let mut script = format!("-- Mirror of {}\n", def.qualified_name());
    let mut current = None;
    for statement in build(def) {
        if current != Some(statement.section) {
            script.push_str(&format!("\n-- {}\n", statement.section));
            current = Some(statement.section);
        }
        script.push_str(&statement.sql);
        script.push_str("\nGO\n");
    }
    script
}

fn create_table(def: &TableDefinition) -> String {
    let columns = def
        .columns
        .iter()
        .map(|c| format!("    {}", column_definition(c)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n)", def.qualified_name(), columns)
}

fn column_definition(col: &ColumnDefinition) -> String {
    let name = quote_ident(&col.name);
    if col.is_computed {
        let mut sql = format!(
            "{} AS {}",
            name,
            col.computed_definition.as_deref().unwrap_or("NULL")
        );
        if col.computed_is_persisted {
            sql.push_str(" PERSISTED");
        }
        return sql;
    }

    let mut sql = format!("{} {}", name, column_type(col));
    if let Some(collation) = &col.collation_name {
        sql.push_str(&format!(" COLLATE {}", collation));
    }
    if col.is_identity {
        sql.push_str(&format!(
            " IDENTITY({},{})",
            col.identity_seed, col.identity_increment
        ));
    }
    if col.is_rowguidcol {
        sql.push_str(" ROWGUIDCOL");
    }
    sql.push_str(if col.is_nullable { " NULL" } else { " NOT NULL" });
    sql
}

/// Exact SQL type of a column, e.g. `[nvarchar](50)` or `[decimal](18,2)`.
pub fn column_type(col: &ColumnDefinition) -> String {
    let type_name = col.type_name.as_str();
    let quoted = quote_ident(type_name);
    match type_name {
        "char" | "varchar" | "binary" | "varbinary" | "nchar" | "nvarchar" => {
            if col.max_length == -1 {
                format!("{}(MAX)", quoted)
            } else if type_name.starts_with('n') {
                // nchar/nvarchar lengths are stored in bytes
                format!("{}({})", quoted, col.max_length / 2)
            } else {
                format!("{}({})", quoted, col.max_length)
            }
        }
        "decimal" | "numeric" => format!("{}({},{})", quoted, col.precision, col.scale),
        "time" | "datetime2" | "datetimeoffset" => format!("{}({})", quoted, col.scale),
        _ => quoted,
    }
}

fn clustering(clustered: bool) -> &'static str {
    if clustered {
        "CLUSTERED"
    } else {
        "NONCLUSTERED"
    }
}

fn key_list(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            format!(
                "{} {}",
                quote_ident(&c.name),
                if c.is_descending { "DESC" } else { "ASC" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn nocheck(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} NOCHECK CONSTRAINT {}",
        table,
        quote_ident(constraint)
    )
}
