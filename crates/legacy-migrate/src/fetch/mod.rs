//! Source data fetcher.
//!
//! Reads one legacy table into memory with a single `SELECT`. The requested
//! column set is reconciled against the columns the table actually has, so a
//! descriptor written for one product version still runs against another.

use tracing::{debug, info, warn};

use crate::core::identifier::TableName;
use crate::core::row::SourceRow;
use crate::core::traits::{SelectQueryOptions, SourceConnection, SourceConnector, SourceTable};
use crate::error::{MigrateError, Result};
use crate::migration::TableMigration;

/// What to read from the legacy store.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub table: TableName,
    /// Requested columns; the id column need not be repeated here.
    pub columns: Vec<String>,
    pub id_column: String,
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(table: TableName, columns: Vec<String>, id_column: impl Into<String>) -> Self {
        Self {
            table,
            columns,
            id_column: id_column.into(),
            where_clause: None,
            order_by: None,
            limit: None,
        }
    }

    /// The read a table migration needs.
    pub fn for_migration(migration: &TableMigration) -> Self {
        Self {
            table: migration.source_table().clone(),
            columns: migration.requested_columns(),
            id_column: migration.source_id_column().to_string(),
            where_clause: migration.where_clause().map(str::to_string),
            order_by: migration.order_by().map(str::to_string),
            limit: migration.max_rows(),
        }
    }
}

/// Fetch every matching row of a legacy table.
///
/// The connection is opened here and closed before returning, on success
/// and on failure alike. A missing id column is a configuration error; other
/// missing columns are logged and left out.
pub async fn fetch(connector: &dyn SourceConnector, request: &FetchRequest) -> Result<Vec<SourceRow>> {
    let mut conn = connector.connect().await?;
    let result = fetch_with(conn.as_mut(), request).await;

    if let Err(e) = conn.close().await {
        debug!("Closing {} source connection failed: {}", connector.db_type(), e);
    }

    result
}

async fn fetch_with(conn: &mut dyn SourceConnection, request: &FetchRequest) -> Result<Vec<SourceRow>> {
    let mut found = conn.table_columns(&request.table).await?;
    if found.is_none() && request.table.schema.is_some() {
        debug!("No columns found for {}, retrying without schema", request.table);
        found = conn.table_columns(&request.table.unqualified()).await?;
    }
    // Query the table as the catalog spells it; quoted names are case-sensitive.
    let SourceTable { table, columns: actual } = match found {
        Some(found) if !found.columns.is_empty() => found,
        _ => {
            return Err(MigrateError::Config(format!(
                "source table {} not found or has no columns",
                request.table
            )))
        }
    };
    if table != request.table {
        debug!("Source table {} resolved to {}", request.table, table);
    }

    let selected = reconcile_columns(request, &actual);

    if !selected
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&request.id_column))
    {
        return Err(MigrateError::Config(format!(
            "source id column '{}' does not exist in {}",
            request.id_column, table
        )));
    }

    let sql = conn.dialect().build_select_query(&SelectQueryOptions {
        table: Some(table.clone()),
        columns: selected,
        where_clause: request.where_clause.clone(),
        order_by: request.order_by.clone(),
        limit: request.limit,
    });
    debug!("Fetch query: {}", sql);

    let rows = conn.query(&sql).await?;
    info!("Fetched {} rows from {}", rows.len(), table);
    Ok(rows)
}

/// Requested columns that exist, spelled the way the catalog spells them.
///
/// The id column always comes first.
fn reconcile_columns(request: &FetchRequest, actual: &[String]) -> Vec<String> {
    let requested = std::iter::once(&request.id_column).chain(
        request
            .columns
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&request.id_column)),
    );

    let mut selected: Vec<String> = Vec::new();
    for column in requested {
        match actual.iter().find(|a| a.eq_ignore_ascii_case(column)) {
            Some(found) => {
                if !selected.iter().any(|s| s.eq_ignore_ascii_case(found)) {
                    selected.push(found.clone());
                }
            }
            None => warn!(
                "Column {} does not exist in {}; it will not be migrated",
                column, request.table
            ),
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::test_support::{MemorySource, MemoryTable};

    fn source() -> MemorySource {
        MemorySource::new().with_table(
            MemoryTable::new("dbo.ITEM", &["ITEM_ID", "NAME", "PARENT_ID"])
                .row(vec![SqlValue::I32(1), "Bolt".into(), SqlValue::I32(0)])
                .row(vec![SqlValue::I32(2), "Nut".into(), SqlValue::I32(1)])
                .row(vec![SqlValue::I32(3), "Washer".into(), SqlValue::I32(1)]),
        )
    }

    fn request(table: &str, columns: &[&str], id: &str) -> FetchRequest {
        FetchRequest::new(
            TableName::parse(table).unwrap(),
            columns.iter().map(|c| c.to_string()).collect(),
            id,
        )
    }

    #[tokio::test]
    async fn test_fetch_tolerates_missing_columns() {
        let source = source();
        let rows = fetch(&source, &request("dbo.item", &["name", "LEGACY_FLAG"], "item_id"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].value("ITEM_ID"), &SqlValue::I32(2));
        assert_eq!(rows[1].value("name"), &SqlValue::Text("Nut".into()));
        assert!(!rows[1].contains("PARENT_ID"));
        assert!(!rows[1].contains("LEGACY_FLAG"));

        let queries = source.queries();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].starts_with("SELECT \"ITEM_ID\", \"NAME\" FROM \"dbo\".\"ITEM\""));
        assert_eq!(source.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_fetch_retries_without_schema() {
        let source = source();
        let rows = fetch(&source, &request("legacy.ITEM", &["NAME"], "ITEM_ID"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(source.queries()[0].contains("FROM \"dbo\".\"ITEM\""));
    }

    #[tokio::test]
    async fn test_fetch_uses_catalog_table_spelling() {
        let source = MemorySource::new().with_table(
            MemoryTable::new("dbo.t_category", &["cat_id", "cat_name"])
                .row(vec![SqlValue::I32(1), "Root".into()]),
        );
        let rows = fetch(&source, &request("DBO.T_CATEGORY", &["CAT_NAME"], "CAT_ID"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("CAT_NAME"), &SqlValue::Text("Root".into()));
        assert_eq!(
            source.queries()[0],
            "SELECT \"cat_id\", \"cat_name\" FROM \"dbo\".\"t_category\""
        );
    }

    #[tokio::test]
    async fn test_missing_id_column_is_config_error() {
        let source = source();
        let err = fetch(&source, &request("dbo.ITEM", &["NAME"], "ID"))
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(source.queries().is_empty());
        assert_eq!(source.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_unknown_table_is_config_error() {
        let source = source();
        let err = fetch(&source, &request("dbo.NOPE", &[], "ID")).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_query_failure_releases_connection() {
        let source = source().failing_queries();
        let err = fetch(&source, &request("dbo.ITEM", &["NAME"], "ITEM_ID"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Source(_)));
        assert_eq!(source.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_limit_and_clauses_reach_the_query() {
        let source = source();
        let mut req = request("dbo.ITEM", &["NAME"], "ITEM_ID");
        req.where_clause = Some("NAME <> 'x'".into());
        req.order_by = Some("ITEM_ID DESC".into());
        req.limit = Some(2);

        let rows = fetch(&source, &req).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(source.queries()[0].ends_with("WHERE NAME <> 'x' ORDER BY ITEM_ID DESC LIMIT 2"));
    }
}
