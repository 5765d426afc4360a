//! MSSQL source reader implementation.
//!
//! One Tiberius client per fetch, over a plain TCP stream adapted with
//! `tokio-util`'s compat layer.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::xml::XmlData;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::dialect::MssqlDialect;
use crate::config::SourceConfig;
use crate::core::identifier::TableName;
use crate::core::row::SourceRow;
use crate::core::traits::{Dialect, SourceConnection, SourceConnector, SourceTable};
use crate::core::value::{SqlNullType, SqlValue};
use crate::drivers::common::decoded_or_null;
use crate::drivers::common::url::is_jdbc;
use crate::error::{MigrateError, Result};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Opens connections to a SQL Server legacy database.
pub struct MssqlReader {
    config: Config,
}

impl MssqlReader {
    /// Create a reader from the connection descriptor.
    ///
    /// Accepts `jdbc:sqlserver://host:port;databaseName=...` URLs and ADO.NET
    /// connection strings. Credentials in the descriptor override those in
    /// the URL.
    pub fn new(source: &SourceConfig) -> Result<Self> {
        let url = source.url.trim();
        let mut config = if is_jdbc(url) {
            Config::from_jdbc_string(url)
        } else {
            Config::from_ado_string(url)
        }
        .map_err(|e| MigrateError::Config(format!("invalid SQL Server source URL: {}", e)))?;

        if !source.username.is_empty() {
            config.authentication(AuthMethod::sql_server(&source.username, &source.password));
        }
        if source.trust_server_cert {
            config.trust_cert();
        }
        config.packet_size(TDS_MAX_PACKET_SIZE);

        Ok(Self { config })
    }
}

#[async_trait]
impl SourceConnector for MssqlReader {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| MigrateError::source_db(format!("mssql connect: {}", e)))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(self.config.clone(), tcp.compat_write()).await?;
        debug!("Opened SQL Server source connection");

        Ok(Box::new(MssqlConnection {
            client,
            dialect: MssqlDialect::new(),
        }))
    }

    fn db_type(&self) -> &str {
        "mssql"
    }
}

/// An open SQL Server source connection.
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
    dialect: MssqlDialect,
}

#[async_trait]
impl SourceConnection for MssqlConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_columns(&mut self, table: &TableName) -> Result<Option<SourceTable>> {
        let query = r#"
            SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE LOWER(TABLE_NAME) = LOWER(@P1)
              AND (@P2 = '' OR LOWER(TABLE_SCHEMA) = LOWER(@P2))
            ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION
        "#;

        let schema = table.schema.as_deref().unwrap_or("");
        let rows = self
            .client
            .query(query, &[&table.name.as_str(), &schema])
            .await?
            .into_first_result()
            .await?;

        let text = |row: &Row, idx: usize| row.get::<&str, _>(idx).unwrap_or_default().to_string();
        Ok(SourceTable::from_catalog(
            rows.iter()
                .map(|row| (text(row, 0), text(row, 1), text(row, 2))),
        ))
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<SourceRow>> {
        let rows = self.client.simple_query(sql).await?.into_first_result().await?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }
}

fn convert_row(row: &Row) -> SourceRow {
    let mut out = SourceRow::with_capacity(row.len());
    for (column, data) in row.cells() {
        let value = decoded_or_null(convert_column_data(data), column.name(), null_type_for(data));
        out.set(column.name(), value.normalize_temporal());
    }
    out
}

/// Get the appropriate null type for a TDS cell.
fn null_type_for(data: &ColumnData<'static>) -> SqlNullType {
    match data {
        ColumnData::Bit(_) => SqlNullType::Bool,
        ColumnData::U8(_) | ColumnData::I16(_) => SqlNullType::I16,
        ColumnData::I32(_) => SqlNullType::I32,
        ColumnData::I64(_) => SqlNullType::I64,
        ColumnData::F32(_) | ColumnData::F64(_) => SqlNullType::F64,
        ColumnData::Guid(_) => SqlNullType::Uuid,
        ColumnData::Binary(_) => SqlNullType::Bytes,
        ColumnData::Numeric(_) => SqlNullType::Decimal,
        ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)
        | ColumnData::DateTimeOffset(_) => SqlNullType::Timestamp,
        ColumnData::Date(_) => SqlNullType::Date,
        ColumnData::Time(_) => SqlNullType::Time,
        ColumnData::String(_) | ColumnData::Xml(_) => SqlNullType::String,
    }
}

fn nullable<T>(value: Option<T>, wrap: impl FnOnce(T) -> SqlValue, null: SqlNullType) -> SqlValue {
    value.map(wrap).unwrap_or(SqlValue::Null(null))
}

/// Convert one TDS cell to a SqlValue.
fn convert_column_data(data: &ColumnData<'static>) -> tiberius::Result<SqlValue> {
    let value = match data {
        ColumnData::Bit(v) => nullable(*v, SqlValue::Bool, SqlNullType::Bool),
        ColumnData::U8(v) => nullable(*v, |v| SqlValue::I16(i16::from(v)), SqlNullType::I16),
        ColumnData::I16(v) => nullable(*v, SqlValue::I16, SqlNullType::I16),
        ColumnData::I32(v) => nullable(*v, SqlValue::I32, SqlNullType::I32),
        ColumnData::I64(v) => nullable(*v, SqlValue::I64, SqlNullType::I64),
        ColumnData::F32(v) => nullable(*v, |v| SqlValue::F64(f64::from(v)), SqlNullType::F64),
        ColumnData::F64(v) => nullable(*v, SqlValue::F64, SqlNullType::F64),
        ColumnData::Guid(v) => nullable(*v, SqlValue::Uuid, SqlNullType::Uuid),
        ColumnData::String(v) => nullable(
            v.as_ref(),
            |s| SqlValue::Text(s.to_string()),
            SqlNullType::String,
        ),
        ColumnData::Binary(v) => nullable(
            v.as_ref(),
            |b| SqlValue::Bytes(b.to_vec()),
            SqlNullType::Bytes,
        ),
        ColumnData::Numeric(v) => match v {
            Some(n) => SqlValue::Decimal(
                Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())).map_err(
                    |e| tiberius::error::Error::Conversion(format!("numeric: {}", e).into()),
                )?,
            ),
            None => SqlValue::Null(SqlNullType::Decimal),
        },
        ColumnData::Xml(v) => nullable(
            v.as_ref(),
            |x| SqlValue::Text(XmlData::clone(x).into_string()),
            SqlNullType::String,
        ),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            nullable(
                NaiveDateTime::from_sql(data)?,
                SqlValue::Timestamp,
                SqlNullType::Timestamp,
            )
        }
        ColumnData::Date(_) => nullable(NaiveDate::from_sql(data)?, SqlValue::Date, SqlNullType::Date),
        ColumnData::Time(_) => nullable(NaiveTime::from_sql(data)?, SqlValue::Time, SqlNullType::Time),
        ColumnData::DateTimeOffset(_) => nullable(
            DateTime::<FixedOffset>::from_sql(data)?,
            |v| SqlValue::Timestamp(v.naive_utc()),
            SqlNullType::Timestamp,
        ),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn source(url: &str) -> SourceConfig {
        SourceConfig {
            driver: "mssql".to_string(),
            url: url.to_string(),
            username: "legacy".to_string(),
            password: "pw".to_string(),
            trust_server_cert: true,
            ssl_mode: "disable".to_string(),
        }
    }

    #[test]
    fn test_jdbc_and_ado_urls_accepted() {
        assert!(MssqlReader::new(&source("jdbc:sqlserver://db:1433;databaseName=erp")).is_ok());
        assert!(MssqlReader::new(&source("server=tcp:db,1433;database=erp")).is_ok());
    }

    #[test]
    fn test_convert_scalars() {
        assert_eq!(
            convert_column_data(&ColumnData::U8(Some(7))).unwrap(),
            SqlValue::I16(7)
        );
        assert_eq!(
            convert_column_data(&ColumnData::I32(None)).unwrap(),
            SqlValue::Null(SqlNullType::I32)
        );
        assert_eq!(
            convert_column_data(&ColumnData::String(Some(Cow::Borrowed("Y")))).unwrap(),
            SqlValue::Text("Y".to_string())
        );
    }

    #[test]
    fn test_convert_numeric() {
        let numeric = tiberius::numeric::Numeric::new_with_scale(12345, 2);
        assert_eq!(
            convert_column_data(&ColumnData::Numeric(Some(numeric))).unwrap(),
            SqlValue::Decimal(Decimal::new(12345, 2))
        );
    }

    #[test]
    fn test_numeric_out_of_range_reads_as_null() {
        // SQL Server allows scales past what Decimal can carry.
        let data = ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(1, 30)));
        assert!(convert_column_data(&data).is_err());
        assert_eq!(
            decoded_or_null(convert_column_data(&data), "UNIT_COST", null_type_for(&data)),
            SqlValue::Null(SqlNullType::Decimal)
        );
    }

    #[test]
    fn test_null_type_for_cells() {
        assert_eq!(null_type_for(&ColumnData::U8(None)), SqlNullType::I16);
        assert_eq!(null_type_for(&ColumnData::Guid(None)), SqlNullType::Uuid);
        assert_eq!(null_type_for(&ColumnData::Xml(None)), SqlNullType::String);
        assert_eq!(
            null_type_for(&ColumnData::DateTimeOffset(None)),
            SqlNullType::Timestamp
        );
    }
}
