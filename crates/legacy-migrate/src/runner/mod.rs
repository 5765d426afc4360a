//! Migration runner: the ordered table list and the run loop.
//!
//! Tables run strictly in the order given. That order encodes the dependency
//! graph between target types, so the run stops at the first table that
//! cannot be migrated rather than letting dependent tables load against
//! incomplete data.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::config::Config;
use crate::core::traits::{RawWriter, SourceConnector, TargetStore};
use crate::error::{MigrateError, Result};
use crate::metadata::MetadataResolver;
use crate::migration::{MigrationContext, TableMigration};
use crate::orchestrator::{
    MigrationRunSummary, OrchestratorOptions, TableOrchestrator, TablePlan,
};

/// Runs table migrations in order.
pub struct MigrationRunner {
    orchestrator: TableOrchestrator,
    tables: Vec<TableMigration>,
}

impl MigrationRunner {
    pub fn new(orchestrator: TableOrchestrator, tables: Vec<TableMigration>) -> Self {
        Self {
            orchestrator,
            tables,
        }
    }

    /// Build a runner for a loaded configuration.
    pub fn from_config(
        config: &Config,
        connector: Arc<dyn SourceConnector>,
        store: Arc<dyn TargetStore>,
        raw: Arc<dyn RawWriter>,
    ) -> Result<Self> {
        let resolver = MetadataResolver::new(Arc::new(config.registry()?), &config.target.schema);
        let orchestrator = TableOrchestrator::new(
            connector,
            store,
            raw,
            resolver,
            OrchestratorOptions::from(&config.migration),
        );
        Ok(Self::new(orchestrator, config.migrations()?))
    }

    /// Keep only the named tables, in their configured order.
    ///
    /// A name matches a table's source name or its target type, ignoring
    /// case. Unknown names are a configuration error.
    pub fn only<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }

        let matches = |m: &TableMigration, name: &str| {
            m.name().eq_ignore_ascii_case(name) || m.target_type().eq_ignore_ascii_case(name)
        };

        for name in names {
            if !self.tables.iter().any(|m| matches(m, name.as_ref())) {
                return Err(MigrateError::Config(format!(
                    "no table migration named '{}'",
                    name.as_ref()
                )));
            }
        }

        self.tables
            .retain(|m| names.iter().any(|name| matches(m, name.as_ref())));
        Ok(self)
    }

    pub fn tables(&self) -> &[TableMigration] {
        &self.tables
    }

    /// Migrate every table in order.
    ///
    /// Returns one summary per table, or the first fatal error wrapped with
    /// the name of the table that raised it. Tables after it do not run.
    pub async fn run(&mut self, ctx: &mut MigrationContext) -> Result<Vec<MigrationRunSummary>> {
        let started = Instant::now();
        info!(
            "Starting run {} with {} table(s)",
            ctx.run_id(),
            self.tables.len()
        );

        let mut summaries = Vec::with_capacity(self.tables.len());
        for (index, migration) in self.tables.iter().enumerate() {
            info!(
                "Table {}/{}: {} -> {}",
                index + 1,
                self.tables.len(),
                migration.name(),
                migration.target_type()
            );
            match self.orchestrator.migrate(migration, ctx).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!(
                        "Table {} failed, stopping run ({} table(s) not migrated): {}",
                        migration.name(),
                        self.tables.len() - index - 1,
                        e
                    );
                    return Err(MigrateError::table(migration.name(), e));
                }
            }
        }

        let failed_rows: u64 = summaries.iter().map(|s| s.rows_failed).sum();
        let failed_batches: u64 = summaries.iter().map(|s| s.batches_failed).sum();
        info!(
            "Run {} completed: {} table(s), {} failed row(s), {} failed batch(es) in {:.1}s",
            ctx.run_id(),
            summaries.len(),
            failed_rows,
            failed_batches,
            started.elapsed().as_secs_f64()
        );
        Ok(summaries)
    }

    /// Resolve every table without touching a database.
    pub fn plan(&mut self) -> Result<Vec<TablePlan>> {
        let mut plans = Vec::with_capacity(self.tables.len());
        for migration in &self.tables {
            let plan = self
                .orchestrator
                .plan(migration)
                .map_err(|e| MigrateError::table(migration.name(), e))?;
            plans.push(plan);
        }
        Ok(plans)
    }
}
