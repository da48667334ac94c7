//! Identifier and definition text helpers
//!
//! Quoting rules per engine and the normalization applied to stored
//! definitions before they are compared.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::types::Dialect;

static TRAILING_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+\n").expect("valid regex"));

static MYSQL_DEFINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+DEFINER\s*=\s*(`[^`]*`|'[^']*'|[^\s@]+)@(`[^`]*`|'[^']*'|[^\s]+)")
        .expect("valid regex")
});

/// Quote an identifier for the given engine, escaping embedded quote characters
pub fn quote_identifier(dialect: Dialect, name: &str) -> String {
    match dialect {
        Dialect::MySql => format!("`{}`", name.replace('`', "``")),
        Dialect::PostgreSql => format!("\"{}\"", name.replace('"', "\"\"")),
        Dialect::MicrosoftSql => format!("[{}]", name.replace(']', "]]")),
    }
}

/// Quote `name`, prefixed by its quoted schema when `use_schema` is set
pub fn qualify(dialect: Dialect, schema: &str, name: &str, use_schema: bool) -> String {
    if use_schema && !schema.is_empty() {
        format!(
            "{}.{}",
            quote_identifier(dialect, schema),
            quote_identifier(dialect, name)
        )
    } else {
        quote_identifier(dialect, name)
    }
}

/// Render a string as a single-quoted SQL literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Canonical form of a stored definition used for equality checks
///
/// Line endings become `\n`, trailing blanks on each line are dropped and the
/// whole text is trimmed.
pub fn normalize_definition(definition: &str) -> String {
    let unified = definition.replace("\r\n", "\n").replace('\r', "\n");
    let stripped = TRAILING_WHITESPACE.replace_all(&unified, "\n");
    stripped.trim().to_string()
}

/// Remove the `DEFINER=user@host` clause MySQL puts into `SHOW CREATE` output
pub fn strip_mysql_definer(definition: &str) -> String {
    MYSQL_DEFINER.replace(definition, "").into_owned()
}
