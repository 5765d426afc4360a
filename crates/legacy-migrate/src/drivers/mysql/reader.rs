//! MySQL/MariaDB source reader implementation.
//!
//! One SQLx connection per fetch; rows are decoded by the column's reported
//! type name.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection as SqlxConnection, MySqlRow, MySqlSslMode};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::dialect::MysqlDialect;
use crate::config::SourceConfig;
use crate::core::identifier::TableName;
use crate::core::row::SourceRow;
use crate::core::traits::{Dialect, SourceConnection, SourceConnector, SourceTable};
use crate::core::value::{SqlNullType, SqlValue};
use crate::drivers::common::url::{normalize_scheme, retain_query_params};
use crate::drivers::common::{decoded_or_null, SslMode};
use crate::error::{MigrateError, Result};

/// URL parameters SQLx understands; JDBC-only flags are dropped.
const MYSQL_URL_PARAMS: &[&str] = &[
    "ssl-mode",
    "ssl-ca",
    "charset",
    "collation",
    "socket",
    "statement-cache-capacity",
];

/// Opens connections to a MySQL or MariaDB legacy database.
pub struct MysqlReader {
    options: MySqlConnectOptions,
}

impl MysqlReader {
    /// Create a reader from the connection descriptor.
    ///
    /// Accepts `mysql://`, `mariadb://` and their `jdbc:` forms. The
    /// descriptor's `ssl_mode` applies unless the URL names one itself.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let url = normalize_scheme(&config.url, "mysql", &["mariadb"]).ok_or_else(|| {
            MigrateError::Config(format!(
                "source.url is not a MySQL URL: {}",
                crate::config::redact_url(&config.url)
            ))
        })?;
        let url = retain_query_params(&url, MYSQL_URL_PARAMS);

        let mut options = MySqlConnectOptions::from_str(&url)
            .map_err(|e| MigrateError::Config(format!("invalid MySQL source URL: {}", e)))?;
        if !config.username.is_empty() {
            options = options.username(&config.username);
        }
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }
        if !url.contains("ssl-mode=") {
            options = options.ssl_mode(mysql_ssl_mode(SslMode::parse(&config.ssl_mode)?));
        }

        Ok(Self { options })
    }
}

fn mysql_ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disable => MySqlSslMode::Disabled,
        SslMode::Require => MySqlSslMode::Required,
        SslMode::VerifyCa => MySqlSslMode::VerifyCa,
        SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

#[async_trait]
impl SourceConnector for MysqlReader {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>> {
        let conn = SqlxConnection::connect_with(&self.options).await?;
        debug!("Opened MySQL source connection");

        Ok(Box::new(MysqlConnection {
            conn,
            dialect: MysqlDialect::new(),
        }))
    }

    fn db_type(&self) -> &str {
        "mysql"
    }
}

/// An open MySQL source connection.
pub struct MysqlConnection {
    conn: SqlxConnection,
    dialect: MysqlDialect,
}

#[async_trait]
impl SourceConnection for MysqlConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_columns(&mut self, table: &TableName) -> Result<Option<SourceTable>> {
        // Without a schema, look in the connection's database only.
        let query = r#"
            SELECT CAST(TABLE_SCHEMA AS CHAR(255)) AS TABLE_SCHEMA,
                   CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                   CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE LOWER(TABLE_NAME) = LOWER(?)
              AND LOWER(TABLE_SCHEMA) = LOWER(COALESCE(?, DATABASE()))
            ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .bind(table.name.as_str())
            .bind(table.schema.as_deref())
            .fetch_all(&mut self.conn)
            .await?;

        let mut catalog: Vec<(String, String, String)> = Vec::with_capacity(rows.len());
        for row in rows {
            catalog.push((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?));
        }
        Ok(SourceTable::from_catalog(catalog))
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<SourceRow>> {
        let rows = sqlx::query(sql).fetch_all(&mut self.conn).await?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn convert_row(row: &MySqlRow) -> SourceRow {
    let mut out = SourceRow::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_lowercase();
        let value = decoded_or_null(
            convert_value(row, idx, &type_name),
            column.name(),
            null_type_for(&type_name),
        );
        out.set(column.name(), value.normalize_temporal());
    }
    out
}

/// Convert one MySQL column value, dispatching on the reported type name.
fn convert_value(row: &MySqlRow, idx: usize, type_name: &str) -> sqlx::Result<SqlValue> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null(null_type_for(type_name)));
    }

    let value = match type_name {
        "boolean" | "bool" => SqlValue::Bool(row.try_get(idx)?),
        "tinyint" => SqlValue::I16(i16::from(row.try_get::<i8, _>(idx)?)),
        "tinyint unsigned" => SqlValue::I16(i16::from(row.try_get::<u8, _>(idx)?)),
        "smallint" => SqlValue::I16(row.try_get(idx)?),
        "smallint unsigned" => SqlValue::I32(i32::from(row.try_get::<u16, _>(idx)?)),
        "mediumint" | "int" | "integer" => SqlValue::I32(row.try_get(idx)?),
        "mediumint unsigned" | "int unsigned" | "integer unsigned" => {
            SqlValue::I64(i64::from(row.try_get::<u32, _>(idx)?))
        }
        "bigint" => SqlValue::I64(row.try_get(idx)?),
        "bigint unsigned" | "bit" => {
            let v: u64 = row.try_get(idx)?;
            i64::try_from(v)
                .map(SqlValue::I64)
                .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(v)))
        }
        "year" => SqlValue::I32(i32::from(row.try_get::<u16, _>(idx)?)),
        "float" => SqlValue::F64(f64::from(row.try_get::<f32, _>(idx)?)),
        "double" | "real" => SqlValue::F64(row.try_get(idx)?),
        "decimal" | "numeric" => SqlValue::Decimal(row.try_get(idx)?),
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            SqlValue::Bytes(row.try_get(idx)?)
        }
        "date" => SqlValue::Date(row.try_get(idx)?),
        "time" => SqlValue::Time(row.try_get(idx)?),
        "datetime" | "timestamp" => SqlValue::Timestamp(row.try_get(idx)?),
        _ => match row.try_get::<String, _>(idx) {
            Ok(s) => SqlValue::Text(s),
            // Columns without a character set come back as bytes.
            Err(_) => {
                let bytes: Vec<u8> = row.try_get(idx)?;
                SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        },
    };
    Ok(value)
}

/// Get the appropriate null type for a MySQL data type.
fn null_type_for(type_name: &str) -> SqlNullType {
    match type_name {
        "boolean" | "bool" => SqlNullType::Bool,
        "tinyint" | "tinyint unsigned" | "smallint" => SqlNullType::I16,
        "smallint unsigned" | "mediumint" | "int" | "integer" | "year" => SqlNullType::I32,
        "mediumint unsigned" | "int unsigned" | "integer unsigned" | "bigint" => SqlNullType::I64,
        "bigint unsigned" | "bit" => SqlNullType::I64,
        "float" | "double" | "real" => SqlNullType::F64,
        "decimal" | "numeric" => SqlNullType::Decimal,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            SqlNullType::Bytes
        }
        "date" => SqlNullType::Date,
        "time" => SqlNullType::Time,
        "datetime" | "timestamp" => SqlNullType::Timestamp,
        _ => SqlNullType::String,
    }
}
