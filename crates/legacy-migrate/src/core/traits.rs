//! Core traits for reading the legacy store and writing the target store.
//!
//! - [`SourceConnector`] / [`SourceConnection`]: one short-lived connection per table fetch
//! - [`Dialect`]: SQL syntax strategy for the legacy engine
//! - [`TargetStore`]: the normal persistence path of the target store
//! - [`RawWriter`]: the forced-identity escape hatch
//!
//! # Design Patterns
//!
//! - **Strategy**: `Dialect` provides interchangeable quoting and limit syntax
//! - **Template Method**: `Dialect::build_select_query` is written once over
//!   the per-dialect primitives

use async_trait::async_trait;

use super::identifier::TableName;
use super::row::SourceRow;
use super::value::SqlValue;
use crate::error::Result;

/// Opens connections to the legacy store.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Open a new connection. The caller owns it and releases it by dropping
    /// or closing it.
    async fn connect(&self) -> Result<Box<dyn SourceConnection>>;

    /// Get the database type identifier (e.g., "mssql", "postgres").
    fn db_type(&self) -> &str;
}

/// An open connection to the legacy store.
#[async_trait]
pub trait SourceConnection: Send {
    /// SQL dialect spoken by this connection.
    fn dialect(&self) -> &dyn Dialect;

    /// Look a table up in the catalog.
    ///
    /// Matching ignores case. A table without a schema matches in any schema.
    /// The result carries the catalog's own spelling of the schema and table,
    /// which is what later queries must use. An unknown table yields `None`.
    async fn table_columns(&mut self, table: &TableName) -> Result<Option<SourceTable>>;

    /// Run a query and materialize every row.
    ///
    /// Temporal values are normalized to [`SqlValue::Timestamp`].
    async fn query(&mut self, sql: &str) -> Result<Vec<SourceRow>>;

    /// Close the connection gracefully.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A legacy table as the catalog spells it, with its columns in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub table: TableName,
    pub columns: Vec<String>,
}

impl SourceTable {
    /// Collect `(schema, table, column)` catalog rows into the first table they describe.
    ///
    /// Rows must be ordered by schema, table and ordinal position. When a
    /// name matches in several schemas, the first one wins.
    pub fn from_catalog<I>(rows: I) -> Option<Self>
    where
        I: IntoIterator<Item = (String, String, String)>,
    {
        let mut found: Option<Self> = None;
        for (schema, name, column) in rows {
            let schema = Some(schema).filter(|s| !s.is_empty());
            let current = found.get_or_insert_with(|| Self {
                table: TableName::new(schema.as_deref(), &name),
                columns: Vec::new(),
            });
            if current.table.schema != schema || current.table.name != name {
                continue;
            }
            if !column.is_empty() && !current.columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                current.columns.push(column);
            }
        }
        found
    }
}

/// How a dialect limits the number of returned rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSyntax {
    /// `SELECT TOP n ...` (SQL Server)
    Top,
    /// `... LIMIT n` (PostgreSQL, MySQL)
    Limit,
}

/// Options for building the fetch query.
#[derive(Debug, Clone, Default)]
pub struct SelectQueryOptions {
    pub table: Option<TableName>,
    /// Columns to select, in order.
    pub columns: Vec<String>,
    /// Filter predicate, without the `WHERE` keyword.
    pub where_clause: Option<String>,
    /// Ordering, without the `ORDER BY` keyword.
    pub order_by: Option<String>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

/// SQL syntax strategy for different legacy engines.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "mssql", "postgres").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - MSSQL: `[identifier]`
    /// - PostgreSQL: `"identifier"`
    /// - MySQL: `` `identifier` ``
    fn quote_ident(&self, name: &str) -> String;

    /// Row limit syntax.
    fn limit_syntax(&self) -> LimitSyntax {
        LimitSyntax::Limit
    }

    /// Build the single SELECT used to fetch a table.
    fn build_select_query(&self, opts: &SelectQueryOptions) -> String {
        let cols = if opts.columns.is_empty() {
            "*".to_string()
        } else {
            opts.columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let table = opts
            .table
            .as_ref()
            .map(|t| t.quoted(|part| self.quote_ident(part)))
            .unwrap_or_default();

        let top = match (self.limit_syntax(), opts.limit) {
            (LimitSyntax::Top, Some(n)) => format!("TOP {} ", n),
            _ => String::new(),
        };

        let mut sql = format!("SELECT {}{} FROM {}", top, cols, table);

        if let Some(ref where_clause) = opts.where_clause {
            if !where_clause.trim().is_empty() {
                sql.push_str(&format!(" WHERE {}", where_clause));
            }
        }

        if let Some(ref order_by) = opts.order_by {
            if !order_by.trim().is_empty() {
                sql.push_str(&format!(" ORDER BY {}", order_by));
            }
        }

        if let (LimitSyntax::Limit, Some(n)) = (self.limit_syntax(), opts.limit) {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        sql
    }
}

/// A column and the value to write to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub column: String,
    pub value: SqlValue,
}

impl ColumnValue {
    pub fn new(column: impl Into<String>, value: SqlValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// One deferred self-reference: set `reference` on the row identified by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceUpdate {
    pub id: SqlValue,
    pub reference: SqlValue,
}

/// The normal persistence path of the target store.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Lightweight existence probe for a record id.
    async fn exists(&self, table: &TableName, id_column: &str, id: &SqlValue) -> Result<bool>;

    /// Insert-or-update by id (upsert by merge).
    async fn merge(&self, table: &TableName, id_column: &str, row: &[ColumnValue]) -> Result<()>;

    /// Apply a batch of reference updates in a single transaction.
    ///
    /// Any failing statement rolls back the whole batch. Returns the number
    /// of rows updated.
    async fn update_references(
        &self,
        table: &TableName,
        column: &str,
        id_column: &str,
        updates: &[ReferenceUpdate],
    ) -> Result<u64>;

    /// Move a store-generated id sequence past the largest carried-over id.
    async fn sync_identity(&self, table: &TableName, id_column: &str) -> Result<()>;

    /// Get the database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;
}

/// Forced-identity inserts.
///
/// Writes exactly the given columns, including an explicit id, bypassing
/// whatever id generation the table would otherwise apply. Kept apart from
/// [`TargetStore`] so that only the row insert processor reaches for it.
#[async_trait]
pub trait RawWriter: Send + Sync {
    async fn insert_raw(&self, table: &TableName, row: &[ColumnValue]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Brackets;

    impl Dialect for Brackets {
        fn name(&self) -> &str {
            "brackets"
        }

        fn quote_ident(&self, name: &str) -> String {
            format!("[{}]", name)
        }

        fn limit_syntax(&self) -> LimitSyntax {
            LimitSyntax::Top
        }
    }

    struct Quotes;

    impl Dialect for Quotes {
        fn name(&self) -> &str {
            "quotes"
        }

        fn quote_ident(&self, name: &str) -> String {
            format!("\"{}\"", name)
        }
    }

    fn opts() -> SelectQueryOptions {
        SelectQueryOptions {
            table: Some(TableName::parse("dbo.ITEM").unwrap()),
            columns: vec!["ID".into(), "NAME".into()],
            where_clause: Some("ACTIVE = 1".into()),
            order_by: Some("ID".into()),
            limit: Some(10),
        }
    }

    #[test]
    fn test_select_with_top() {
        assert_eq!(
            Brackets.build_select_query(&opts()),
            "SELECT TOP 10 [ID], [NAME] FROM [dbo].[ITEM] WHERE ACTIVE = 1 ORDER BY ID"
        );
    }

    #[test]
    fn test_select_with_limit() {
        assert_eq!(
            Quotes.build_select_query(&opts()),
            "SELECT \"ID\", \"NAME\" FROM \"dbo\".\"ITEM\" WHERE ACTIVE = 1 ORDER BY ID LIMIT 10"
        );
    }

    fn catalog(rows: &[(&str, &str, &str)]) -> Vec<(String, String, String)> {
        rows.iter()
            .map(|(s, t, c)| (s.to_string(), t.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_source_table_keeps_catalog_spelling() {
        let found = SourceTable::from_catalog(catalog(&[
            ("dbo", "t_category", "cat_id"),
            ("dbo", "t_category", "Cat_Name"),
            ("dbo", "t_category", "CAT_NAME"),
            ("legacy", "T_CATEGORY", "ID"),
        ]))
        .unwrap();

        assert_eq!(found.table, TableName::new(Some("dbo"), "t_category"));
        assert_eq!(found.columns, vec!["cat_id", "Cat_Name"]);
    }

    #[test]
    fn test_source_table_not_found() {
        assert_eq!(SourceTable::from_catalog(Vec::new()), None);
    }

    #[test]
    fn test_select_minimal() {
        let opts = SelectQueryOptions {
            table: Some(TableName::parse("ITEM").unwrap()),
            ..Default::default()
        };
        assert_eq!(Quotes.build_select_query(&opts), "SELECT * FROM \"ITEM\"");
    }
}
