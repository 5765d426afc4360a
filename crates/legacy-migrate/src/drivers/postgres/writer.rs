//! PostgreSQL target store.
//!
//! Implements [`TargetStore`] and [`RawWriter`] over a deadpool-postgres
//! pool. Every value is bound as a native parameter with an explicit cast,
//! so NULLs keep their type and integer widths never have to match the
//! column exactly.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls, Statement};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::identifier::{quote_pg, TableName};
use crate::core::traits::{ColumnValue, RawWriter, ReferenceUpdate, TargetStore};
use crate::core::value::{SqlNullType, SqlValue};
use crate::drivers::common::TlsBuilder;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

type Param = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL target store.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Build the pool. No connection is opened until first use.
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        Ok(Self { pool })
    }

    /// Build the pool and verify that the target answers.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let target = Self::new(config)?;
        target.health_check().await?;
        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(target)
    }

    /// Test the database connection.
    pub async fn health_check(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL target connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }
}

#[async_trait]
impl TargetStore for PgTarget {
    async fn exists(&self, table: &TableName, id_column: &str, id: &SqlValue) -> Result<bool> {
        let (param, cast) = bind(id);
        let sql = exists_sql(table, id_column, cast);
        let client = self.client("probing record id").await?;
        let row = client.query_opt(sql.as_str(), &[param.as_ref() as &(dyn ToSql + Sync)]).await?;
        Ok(row.is_some())
    }

    async fn merge(&self, table: &TableName, id_column: &str, row: &[ColumnValue]) -> Result<()> {
        let (params, casts) = bind_row(row);
        let columns: Vec<&str> = row.iter().map(|c| c.column.as_str()).collect();
        let sql = merge_sql(table, id_column, &columns, &casts);
        let client = self.client("merging record").await?;
        client.execute(sql.as_str(), &param_refs(&params)).await?;
        Ok(())
    }

    async fn update_references(
        &self,
        table: &TableName,
        column: &str,
        id_column: &str,
        updates: &[ReferenceUpdate],
    ) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let bound: Vec<(String, [Param; 2])> = updates
            .iter()
            .map(|u| {
                let (reference, ref_cast) = bind(&u.reference);
                let (id, id_cast) = bind(&u.id);
                (
                    update_reference_sql(table, column, ref_cast, id_column, id_cast),
                    [reference, id],
                )
            })
            .collect();

        let mut client = self.client("backfilling references").await?;
        let tx = client.transaction().await?;

        let mut statements: HashMap<&str, Statement> = HashMap::new();
        for (sql, _) in &bound {
            if !statements.contains_key(sql.as_str()) {
                let stmt = tx.prepare_cached(sql).await?;
                statements.insert(sql.as_str(), stmt);
            }
        }

        // Statements of one transaction are pipelined on its connection.
        let executions = bound.iter().map(|(sql, params)| {
            let stmt = &statements[sql.as_str()];
            let refs = param_refs(params);
            let tx = &tx;
            async move { tx.execute(stmt, &refs).await }
        });
        let counts = futures::future::try_join_all(executions).await?;

        tx.commit().await?;
        Ok(counts.into_iter().sum())
    }

    async fn sync_identity(&self, table: &TableName, id_column: &str) -> Result<()> {
        let client = self.client("syncing identity sequence").await?;
        let qualified = table.quoted(quote_pg);

        let row = client
            .query_one(
                "SELECT pg_get_serial_sequence($1::text, $2::text)",
                &[&qualified, &id_column],
            )
            .await?;
        let Some(sequence) = row.get::<_, Option<String>>(0) else {
            debug!("{}.{} has no backing sequence", table, id_column);
            return Ok(());
        };

        let sql = format!(
            "SELECT setval($1::text::regclass, GREATEST(COALESCE(MAX({col}), 0), 1), MAX({col}) IS NOT NULL) FROM {table}",
            col = quote_pg(id_column),
            table = qualified,
        );
        client.query_one(sql.as_str(), &[&sequence]).await?;
        debug!("Synced sequence {} for {}", sequence, table);
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

#[async_trait]
impl RawWriter for PgTarget {
    async fn insert_raw(&self, table: &TableName, row: &[ColumnValue]) -> Result<()> {
        let (params, casts) = bind_row(row);
        let columns: Vec<&str> = row.iter().map(|c| c.column.as_str()).collect();
        let sql = insert_sql(table, &columns, &casts);
        let client = self.client("inserting record").await?;
        client.execute(sql.as_str(), &param_refs(&params)).await?;
        Ok(())
    }
}

fn exists_sql(table: &TableName, id_column: &str, cast: &str) -> String {
    format!(
        "SELECT 1 FROM {} WHERE {} = $1::{} LIMIT 1",
        table.quoted(quote_pg),
        quote_pg(id_column),
        cast
    )
}

fn placeholders(casts: &[&str]) -> String {
    casts
        .iter()
        .enumerate()
        .map(|(i, cast)| format!("${}::{}", i + 1, cast))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote_pg(c)).collect::<Vec<_>>().join(", ")
}

/// Insert with explicit ids, overriding identity generation.
fn insert_sql(table: &TableName, columns: &[&str], casts: &[&str]) -> String {
    format!(
        "INSERT INTO {} ({}) OVERRIDING SYSTEM VALUE VALUES ({})",
        table.quoted(quote_pg),
        column_list(columns),
        placeholders(casts)
    )
}

fn merge_sql(table: &TableName, id_column: &str, columns: &[&str], casts: &[&str]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !c.eq_ignore_ascii_case(id_column))
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote_pg(c)))
        .collect();

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        table.quoted(quote_pg),
        column_list(columns),
        placeholders(casts),
        quote_pg(id_column),
        action
    )
}

fn update_reference_sql(
    table: &TableName,
    column: &str,
    ref_cast: &str,
    id_column: &str,
    id_cast: &str,
) -> String {
    format!(
        "UPDATE {} SET {} = $1::{} WHERE {} = $2::{}",
        table.quoted(quote_pg),
        quote_pg(column),
        ref_cast,
        quote_pg(id_column),
        id_cast
    )
}

fn bind_row(row: &[ColumnValue]) -> (Vec<Param>, Vec<&'static str>) {
    row.iter().map(|c| bind(&c.value)).unzip()
}

fn param_refs(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Box a value as a native parameter, with the cast that matches its type.
fn bind(value: &SqlValue) -> (Param, &'static str) {
    match value {
        SqlValue::Null(t) => bind_null(*t),
        SqlValue::Bool(v) => (Box::new(*v), "bool"),
        SqlValue::I16(v) => (Box::new(*v), "int2"),
        SqlValue::I32(v) => (Box::new(*v), "int4"),
        SqlValue::I64(v) => (Box::new(*v), "int8"),
        SqlValue::F64(v) => (Box::new(*v), "float8"),
        SqlValue::Decimal(v) => (Box::new(*v), "numeric"),
        SqlValue::Text(v) => (Box::new(v.clone()), "text"),
        SqlValue::Bytes(v) => (Box::new(v.clone()), "bytea"),
        SqlValue::Uuid(v) => (Box::new(*v), "uuid"),
        SqlValue::Date(v) => (Box::new(*v), "date"),
        SqlValue::Time(v) => (Box::new(*v), "time"),
        SqlValue::Timestamp(v) => (Box::new(*v), "timestamp"),
    }
}

fn bind_null(null_type: SqlNullType) -> (Param, &'static str) {
    match null_type {
        SqlNullType::Bool => (Box::new(None::<bool>), "bool"),
        SqlNullType::I16 => (Box::new(None::<i16>), "int2"),
        SqlNullType::I32 => (Box::new(None::<i32>), "int4"),
        SqlNullType::I64 => (Box::new(None::<i64>), "int8"),
        SqlNullType::F64 => (Box::new(None::<f64>), "float8"),
        SqlNullType::Decimal => (Box::new(None::<rust_decimal::Decimal>), "numeric"),
        SqlNullType::String => (Box::new(None::<String>), "text"),
        SqlNullType::Bytes => (Box::new(None::<Vec<u8>>), "bytea"),
        SqlNullType::Uuid => (Box::new(None::<uuid::Uuid>), "uuid"),
        SqlNullType::Date => (Box::new(None::<chrono::NaiveDate>), "date"),
        SqlNullType::Time => (Box::new(None::<chrono::NaiveTime>), "time"),
        SqlNullType::Timestamp => (Box::new(None::<chrono::NaiveDateTime>), "timestamp"),
    }
}
