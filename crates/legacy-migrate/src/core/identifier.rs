//! Identifier validation, quoting and schema-qualified table names.
//!
//! SQL identifiers cannot be bound as parameters, so every table and column
//! name that ends up in generated SQL goes through this module: it is
//! validated once, then quoted with the dialect's rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - MySQL: 64 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
pub fn quote_pg(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a MySQL identifier using backticks.
pub fn quote_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a SQL Server identifier using brackets.
pub fn quote_mssql(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Validate a filter or ordering fragment taken from configuration.
///
/// Fragments are spliced into the fetch query verbatim, so anything that
/// could end the statement or hide the rest of it is rejected.
pub fn validate_sql_fragment(kind: &str, fragment: &str) -> Result<()> {
    let lowered = fragment.to_lowercase();

    let forbidden: &[(&str, &str)] = &[
        (";", "statement separator"),
        ("--", "line comment"),
        ("/*", "block comment"),
        ("*/", "block comment"),
        ("\0", "null byte"),
    ];
    for (pattern, what) in forbidden {
        if lowered.contains(pattern) {
            return Err(MigrateError::Config(format!(
                "{} clause contains a {} ({:?}): {}",
                kind, what, pattern, fragment
            )));
        }
    }

    if fragment.trim().is_empty() {
        return Err(MigrateError::Config(format!("{} clause is empty", kind)));
    }

    Ok(())
}

/// A possibly schema-qualified table name such as `dbo.CUSTOMER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    /// Parse `schema.table` or `table`. Bracket and quote delimiters are stripped.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (schema, name) = match split_qualified(raw) {
            Some((schema, name)) => (Some(unquote(schema)), unquote(name)),
            None => (None, unquote(raw)),
        };

        if let Some(ref s) = schema {
            validate_identifier(s)?;
        }
        validate_identifier(&name)?;

        Ok(Self { schema, name })
    }

    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// The same table without its schema prefix.
    pub fn unqualified(&self) -> Self {
        Self {
            schema: None,
            name: self.name.clone(),
        }
    }

    /// Qualify with `schema` unless a schema is already present.
    pub fn or_schema(&self, schema: &str) -> Self {
        Self {
            schema: Some(self.schema.clone().unwrap_or_else(|| schema.to_string())),
            name: self.name.clone(),
        }
    }

    /// Render with the given quoting function.
    pub fn quoted(&self, quote: impl Fn(&str) -> String) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", quote(s), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

/// Split on the last dot that is outside of quote/bracket delimiters.
fn split_qualified(raw: &str) -> Option<(&str, &str)> {
    let mut depth_bracket = false;
    let mut in_quotes = false;
    let mut split_at = None;
    for (i, c) in raw.char_indices() {
        match c {
            '[' => depth_bracket = true,
            ']' => depth_bracket = false,
            '"' | '`' => in_quotes = !in_quotes,
            '.' if !depth_bracket && !in_quotes => split_at = Some(i),
            _ => {}
        }
    }
    split_at.map(|i| (&raw[..i], &raw[i + 1..]))
}

fn unquote(part: &str) -> String {
    let part = part.trim();
    let stripped = part
        .strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .or_else(|| part.strip_prefix('"').and_then(|p| p.strip_suffix('"')))
        .or_else(|| part.strip_prefix('`').and_then(|p| p.strip_suffix('`')));
    stripped.unwrap_or(part).to_string()
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "{}.{}", s, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl TryFrom<String> for TableName {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self> {
        TableName::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.to_string()
    }
}
