//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL source connector and the target store
//! - [`mssql`]: Microsoft SQL Server source connector
//! - [`mysql`]: MySQL/MariaDB source connector
//! - [`common`]: Shared utilities (TLS, connection URLs)
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/` with a `Dialect` and a
//!    `SourceConnector`
//! 2. Add a variant to [`SourceDriver`] and its aliases to `SourceDriver::parse`
//! 3. Construct the connector in [`connector`]

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;

use std::fmt;

pub use common::{SslMode, TlsBuilder};
pub use mssql::{MssqlDialect, MssqlReader};
pub use mysql::{MysqlDialect, MysqlReader};
pub use postgres::{PgTarget, PostgresDialect, PostgresReader};

use crate::config::SourceConfig;
use crate::core::traits::SourceConnector;
use crate::error::{MigrateError, Result};

/// Legacy database engines the fetcher can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDriver {
    Postgres,
    Mssql,
    Mysql,
}

impl SourceDriver {
    /// Resolve a driver identifier.
    ///
    /// Short names and the JDBC driver class names legacy applications keep
    /// in their configuration are both accepted.
    pub fn parse(driver: &str) -> Result<Self> {
        match driver.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" | "org.postgresql.driver" => Ok(SourceDriver::Postgres),
            "mssql" | "sqlserver" | "sql_server" | "com.microsoft.sqlserver.jdbc.sqlserverdriver" => {
                Ok(SourceDriver::Mssql)
            }
            "mysql" | "mariadb" | "com.mysql.jdbc.driver" | "com.mysql.cj.jdbc.driver"
            | "org.mariadb.jdbc.driver" => Ok(SourceDriver::Mysql),
            other => Err(MigrateError::Config(format!(
                "Unknown source driver: '{}'. Supported drivers: postgres, mssql, mysql",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceDriver::Postgres => "postgres",
            SourceDriver::Mssql => "mssql",
            SourceDriver::Mysql => "mysql",
        }
    }
}

impl fmt::Display for SourceDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the source connector named by the connection descriptor.
///
/// No connection is opened here; the fetcher opens one per table.
pub fn connector(config: &SourceConfig) -> Result<Box<dyn SourceConnector>> {
    let connector: Box<dyn SourceConnector> = match SourceDriver::parse(&config.driver)? {
        SourceDriver::Postgres => Box::new(PostgresReader::new(config)?),
        SourceDriver::Mssql => Box::new(MssqlReader::new(config)?),
        SourceDriver::Mysql => Box::new(MysqlReader::new(config)?),
    };
    Ok(connector)
}
