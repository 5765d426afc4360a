//! Microsoft SQL Server source driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for MSSQL
//! - [`MssqlReader`]: Source connector for MSSQL databases

mod dialect;
mod reader;

pub use dialect::MssqlDialect;
pub use reader::MssqlReader;
