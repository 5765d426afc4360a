//! # legacy-migrate
//!
//! Configuration-driven migration of legacy relational tables into a new
//! PostgreSQL schema.
//!
//! Each table is described by a [`TableMigration`]: which legacy table to
//! read, which target record type its rows become, and how columns map to
//! fields. The engine:
//!
//! - **Keeps primary keys** so references between tables stay valid
//! - **Tolerates schema drift** by migrating only the columns that exist
//! - **Treats `0` as no reference** in legacy foreign key columns
//! - **Loads self-referencing hierarchies in two passes** (insert with the
//!   parent unset, then backfill it in batches)
//! - **Contains failures** to the row or batch that caused them
//! - **Is re-runnable**: rows already present are left alone
//!
//! Legacy sources can be SQL Server, MySQL/MariaDB or PostgreSQL.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use legacy_migrate::{drivers, Config, MigrationRunner, PgTarget};
//!
//! #[tokio::main]
//! async fn main() -> legacy_migrate::Result<()> {
//!     let config = Config::load("migration.yaml")?;
//!     let source = Arc::from(drivers::connector(&config.source)?);
//!     let target = Arc::new(PgTarget::connect(&config.target).await?);
//!
//!     let mut runner = MigrationRunner::from_config(&config, source, target.clone(), target)?;
//!     for summary in runner.run(&mut config.context()?).await? {
//!         println!("{}", summary);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod migration;
pub mod orchestrator;
pub mod processor;
pub mod runner;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use crate::config::{Config, MigrationConfig, SourceConfig, TableConfig, TargetConfig};
pub use crate::core::{
    FieldDef, FieldType, PkValue, RawWriter, RecordType, SourceConnector, SourceRow, SqlValue,
    TableName, TargetStore, TypeRegistry,
};
pub use crate::drivers::{PgTarget, SourceDriver};
pub use crate::error::{MigrateError, Result};
pub use crate::fetch::{fetch, FetchRequest};
pub use crate::metadata::{ForeignKeyDescriptor, IdStrategy, MetadataResolver, TypeMetadata};
pub use crate::migration::{MigrationContext, TableMigration};
pub use crate::orchestrator::{
    MigrationRunSummary, OrchestratorOptions, TableOrchestrator, TablePhase, TablePlan,
};
pub use crate::processor::{BackfillProcessor, InsertOutcome, RowInsertProcessor};
pub use crate::runner::MigrationRunner;
