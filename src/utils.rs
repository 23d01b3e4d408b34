// ABOUTME: Utility functions for identifier quoting and table name handling
// ABOUTME: T-SQL bracket quoting, literal escaping, and schema.table parsing

use anyhow::{bail, Result};

/// Quote a SQL Server identifier (schema, table, column, constraint)
///
/// Wraps the identifier in square brackets and escapes embedded closing
/// brackets by doubling them.
///
/// # Examples
///
/// ```
/// use table_replicator::utils::quote_ident;
/// assert_eq!(quote_ident("Orders"), "[Orders]");
/// assert_eq!(quote_ident("odd]name"), "[odd]]name]");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('[');
    for ch in identifier.chars() {
        if ch == ']' {
            quoted.push(']');
        }
        quoted.push(ch);
    }
    quoted.push(']');
    quoted
}

/// Quote a SQL string literal (for use in SQL statements)
///
/// Escapes single quotes by doubling them and wraps the string in `N'...'` so
/// Unicode text survives. Use this for values, not identifiers.
///
/// # Examples
///
/// ```
/// use table_replicator::utils::quote_literal;
/// assert_eq!(quote_literal("dbo"), "N'dbo'");
/// assert_eq!(quote_literal("it's"), "N'it''s'");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 3);
    quoted.push_str("N'");
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// `[schema].[table]`
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Parse `schema.table` (or a bare `table`, which defaults to `dbo`).
///
/// # Examples
///
/// ```
/// use table_replicator::utils::parse_table_name;
/// assert_eq!(parse_table_name("sales.Orders").unwrap(), ("sales".to_string(), "Orders".to_string()));
/// assert_eq!(parse_table_name("Orders").unwrap(), ("dbo".to_string(), "Orders".to_string()));
/// assert!(parse_table_name("a.b.c").is_err());
/// ```
pub fn parse_table_name(name: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = name
        .split('.')
        .map(|p| p.trim().trim_start_matches('[').trim_end_matches(']'))
        .collect();
    match parts.as_slice() {
        [table] if !table.is_empty() => Ok(("dbo".to_string(), table.to_string())),
        [schema, table] if !schema.is_empty() && !table.is_empty() => {
            Ok((schema.to_string(), table.to_string()))
        }
        _ => bail!(
            "Table must be specified as 'schema.table', got '{}'",
            sanitize_identifier(name)
        ),
    }
}

/// Sanitize an identifier (table name, schema name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection and
/// keep error messages readable. For SQL safety use [`quote_ident`] or
/// parameters instead.
///
/// # Examples
///
/// ```
/// # use table_replicator::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Percentage of `current` over `total`, clamped to 0..=100. An empty phase is complete.
pub fn percent(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((current.min(total) as u128 * 100) / total as u128) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_brackets() {
        assert_eq!(quote_ident("a]b"), "[a]]b]");
        assert_eq!(quote_ident("with space"), "[with space]");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("dbo", "Orders"), "[dbo].[Orders]");
    }

    #[test]
    fn test_parse_table_name_strips_brackets() {
        assert_eq!(
            parse_table_name("[sales].[Order Lines]").unwrap(),
            ("sales".to_string(), "Order Lines".to_string())
        );
        assert!(parse_table_name("").is_err());
        assert!(parse_table_name(".Orders").is_err());
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(3, 0), 100);
        assert_eq!(percent(1, 3), 33);
    }
}
