//! PostgreSQL source reader implementation.
//!
//! One `tokio-postgres` connection per fetch. The connection task is driven
//! in the background and ends when the client is dropped.

use async_trait::async_trait;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use super::dialect::PostgresDialect;
use crate::config::SourceConfig;
use crate::core::identifier::TableName;
use crate::core::row::SourceRow;
use crate::core::traits::{Dialect, SourceConnection, SourceConnector, SourceTable};
use crate::core::value::{SqlNullType, SqlValue};
use crate::drivers::common::url::{normalize_scheme, retain_query_params};
use crate::drivers::common::{decoded_or_null, TlsBuilder};
use crate::error::{MigrateError, Result};

/// URL parameters tokio-postgres understands; JDBC-only flags are dropped.
const PG_URL_PARAMS: &[&str] = &[
    "sslmode",
    "connect_timeout",
    "application_name",
    "options",
    "target_session_attrs",
    "keepalives",
    "keepalives_idle",
];

/// Opens connections to a PostgreSQL legacy database.
pub struct PostgresReader {
    config: PgConfig,
    tls: Option<MakeRustlsConnect>,
}

impl PostgresReader {
    /// Create a reader from the connection descriptor.
    ///
    /// Accepts `postgres://`, `postgresql://` and `jdbc:postgresql://` URLs.
    /// Credentials in the descriptor override those in the URL.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let url = normalize_scheme(&config.url, "postgresql", &["postgres"]).ok_or_else(|| {
            MigrateError::Config(format!(
                "source.url is not a PostgreSQL URL: {}",
                crate::config::redact_url(&config.url)
            ))
        })?;
        let url = retain_query_params(&url, PG_URL_PARAMS);

        let mut pg_config: PgConfig = url
            .parse()
            .map_err(|e| MigrateError::Config(format!("invalid PostgreSQL source URL: {}", e)))?;
        if !config.username.is_empty() {
            pg_config.user(&config.username);
        }
        if !config.password.is_empty() {
            pg_config.password(&config.password);
        }

        let tls = TlsBuilder::parse(&config.ssl_mode)?.build()?;
        match tls {
            Some(_) => pg_config.ssl_mode(PgSslMode::Require),
            None => {
                warn!("PostgreSQL source TLS is disabled. Credentials will be transmitted in plaintext.");
                pg_config.ssl_mode(PgSslMode::Disable)
            }
        };

        Ok(Self {
            config: pg_config,
            tls,
        })
    }
}

#[async_trait]
impl SourceConnector for PostgresReader {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>> {
        let client = match self.tls {
            Some(ref tls) => {
                let (client, connection) = self
                    .config
                    .connect(tls.clone())
                    .await
                    .map_err(MigrateError::source_db)?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("PostgreSQL source connection closed: {}", e);
                    }
                });
                client
            }
            None => {
                let (client, connection) = self
                    .config
                    .connect(NoTls)
                    .await
                    .map_err(MigrateError::source_db)?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("PostgreSQL source connection closed: {}", e);
                    }
                });
                client
            }
        };

        Ok(Box::new(PostgresConnection {
            client,
            dialect: PostgresDialect::new(),
        }))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// An open PostgreSQL source connection.
pub struct PostgresConnection {
    client: Client,
    dialect: PostgresDialect,
}

#[async_trait]
impl SourceConnection for PostgresConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_columns(&mut self, table: &TableName) -> Result<Option<SourceTable>> {
        let query = r#"
            SELECT table_schema::text, table_name::text, column_name::text
            FROM information_schema.columns
            WHERE lower(table_name) = lower($1)
              AND ($2::text IS NULL OR lower(table_schema) = lower($2::text))
            ORDER BY table_schema, table_name, ordinal_position
        "#;

        let schema = table.schema.as_deref();
        let rows = self
            .client
            .query(query, &[&table.name, &schema])
            .await
            .map_err(MigrateError::source_db)?;

        let mut catalog: Vec<(String, String, String)> = Vec::with_capacity(rows.len());
        for row in rows {
            catalog.push((
                row.try_get(0).map_err(MigrateError::source_db)?,
                row.try_get(1).map_err(MigrateError::source_db)?,
                row.try_get(2).map_err(MigrateError::source_db)?,
            ));
        }
        Ok(SourceTable::from_catalog(catalog))
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<SourceRow>> {
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(MigrateError::source_db)?;

        Ok(rows.iter().map(convert_row).collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the client ends the connection task.
        Ok(())
    }
}

fn convert_row(row: &Row) -> SourceRow {
    let mut out = SourceRow::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decoded_or_null(
            convert_pg_value(row, idx, column.type_()),
            column.name(),
            null_type_for(column.type_()),
        );
        out.set(column.name(), value.normalize_temporal());
    }
    out
}

/// Get the appropriate null type for a PostgreSQL column type.
fn null_type_for(ty: &Type) -> SqlNullType {
    match *ty {
        Type::BOOL => SqlNullType::Bool,
        Type::INT2 => SqlNullType::I16,
        Type::INT4 => SqlNullType::I32,
        Type::INT8 | Type::OID => SqlNullType::I64,
        Type::FLOAT4 | Type::FLOAT8 => SqlNullType::F64,
        Type::NUMERIC => SqlNullType::Decimal,
        Type::UUID => SqlNullType::Uuid,
        Type::TIMESTAMP | Type::TIMESTAMPTZ => SqlNullType::Timestamp,
        Type::DATE => SqlNullType::Date,
        Type::TIME => SqlNullType::Time,
        Type::BYTEA => SqlNullType::Bytes,
        _ => SqlNullType::String,
    }
}

fn nullable<T>(value: Option<T>, wrap: impl FnOnce(T) -> SqlValue, null: SqlNullType) -> SqlValue {
    value.map(wrap).unwrap_or(SqlValue::Null(null))
}

/// Convert one PostgreSQL column value to a SqlValue.
fn convert_pg_value(
    row: &Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<SqlValue, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => nullable(row.try_get(idx)?, SqlValue::Bool, SqlNullType::Bool),
        Type::INT2 => nullable(row.try_get(idx)?, SqlValue::I16, SqlNullType::I16),
        Type::INT4 => nullable(row.try_get(idx)?, SqlValue::I32, SqlNullType::I32),
        Type::INT8 => nullable(row.try_get(idx)?, SqlValue::I64, SqlNullType::I64),
        Type::OID => nullable(
            row.try_get::<_, Option<u32>>(idx)?,
            |v| SqlValue::I64(i64::from(v)),
            SqlNullType::I64,
        ),
        Type::FLOAT4 => nullable(
            row.try_get::<_, Option<f32>>(idx)?,
            |v| SqlValue::F64(f64::from(v)),
            SqlNullType::F64,
        ),
        Type::FLOAT8 => nullable(row.try_get(idx)?, SqlValue::F64, SqlNullType::F64),
        Type::NUMERIC => nullable(row.try_get(idx)?, SqlValue::Decimal, SqlNullType::Decimal),
        Type::UUID => nullable(row.try_get(idx)?, SqlValue::Uuid, SqlNullType::Uuid),
        Type::TIMESTAMP => nullable(row.try_get(idx)?, SqlValue::Timestamp, SqlNullType::Timestamp),
        Type::TIMESTAMPTZ => nullable(
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?,
            |v| SqlValue::Timestamp(v.naive_utc()),
            SqlNullType::Timestamp,
        ),
        Type::DATE => nullable(row.try_get(idx)?, SqlValue::Date, SqlNullType::Date),
        Type::TIME => nullable(row.try_get(idx)?, SqlValue::Time, SqlNullType::Time),
        Type::BYTEA => nullable(row.try_get(idx)?, SqlValue::Bytes, SqlNullType::Bytes),
        Type::JSON | Type::JSONB => nullable(
            row.try_get::<_, Option<serde_json::Value>>(idx)?,
            |v| SqlValue::Text(v.to_string()),
            SqlNullType::String,
        ),
        _ => nullable(row.try_get(idx)?, SqlValue::Text, SqlNullType::String),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str) -> SourceConfig {
        SourceConfig {
            driver: "postgres".to_string(),
            url: url.to_string(),
            username: "legacy".to_string(),
            password: "pw".to_string(),
            trust_server_cert: false,
            ssl_mode: "disable".to_string(),
        }
    }

    #[test]
    fn test_jdbc_url_accepted() {
        let reader =
            PostgresReader::new(&source("jdbc:postgresql://db:5433/erp?currentSchema=app")).unwrap();
        assert_eq!(reader.config.get_dbname(), Some("erp"));
        assert_eq!(reader.config.get_ports(), &[5433]);
        assert_eq!(reader.config.get_user(), Some("legacy"));
        assert!(reader.tls.is_none());
    }

    #[test]
    fn test_non_postgres_url_rejected() {
        assert!(PostgresReader::new(&source("jdbc:mysql://db/erp")).is_err());
    }

    #[test]
    fn test_null_type_for_column_types() {
        assert_eq!(null_type_for(&Type::NUMERIC), SqlNullType::Decimal);
        assert_eq!(null_type_for(&Type::TIMESTAMPTZ), SqlNullType::Timestamp);
        assert_eq!(null_type_for(&Type::INET), SqlNullType::String);
        assert_eq!(null_type_for(&Type::INTERVAL), SqlNullType::String);
    }

    #[test]
    fn test_tls_enabled_by_ssl_mode() {
        let mut config = source("postgres://db/erp");
        config.ssl_mode = "require".to_string();
        assert!(PostgresReader::new(&config).unwrap().tls.is_some());
    }
}
