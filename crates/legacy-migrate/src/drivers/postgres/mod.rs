//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresReader`]: Source connector for PostgreSQL legacy databases
//! - [`PgTarget`]: The target store

mod dialect;
mod reader;
mod writer;

pub use dialect::PostgresDialect;
pub use reader::PostgresReader;
pub use writer::PgTarget;
