//! Table orchestrator: drives one table through fetch, insert and backfill.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::MigrationConfig;
use crate::core::row::SourceRow;
use crate::core::traits::{RawWriter, SourceConnector, TargetStore};
use crate::error::{MigrateError, Result};
use crate::fetch::{fetch, FetchRequest};
use crate::metadata::{ForeignKeyDescriptor, IdStrategy, MetadataResolver, TypeMetadata};
use crate::migration::{MigrationContext, TableMigration};
use crate::processor::{BackfillProcessor, InsertOutcome, RowInsertProcessor};

/// Where a table migration is. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePhase {
    Fetching,
    Inserting,
    Backfilling,
    Done,
}

impl fmt::Display for TablePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TablePhase::Fetching => "fetching",
            TablePhase::Inserting => "inserting",
            TablePhase::Backfilling => "backfilling",
            TablePhase::Done => "done",
        })
    }
}

/// Counters for one table migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationRunSummary {
    /// Source table.
    pub table: String,

    /// Target record type.
    pub target_type: String,

    /// Rows returned by the fetch.
    pub rows_fetched: u64,

    /// Rows rejected by the row filter.
    pub rows_skipped: u64,

    /// Rows handed to the insert pass.
    pub rows_processed: u64,

    /// Rows written as new records.
    pub rows_inserted: u64,

    /// Rows whose id was already present.
    pub rows_existing: u64,

    /// Rows that failed to insert.
    pub rows_failed: u64,

    /// Self-references set by the backfill pass.
    pub references_updated: u64,

    /// Backfill batches rolled back.
    pub batches_failed: u64,

    /// Wall time in seconds.
    pub duration_seconds: f64,
}

impl MigrationRunSummary {
    fn new(migration: &TableMigration) -> Self {
        Self {
            table: migration.name(),
            target_type: migration.target_type().to_string(),
            ..Default::default()
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for MigrationRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {} processed ({} inserted, {} existing, {} failed), {} skipped, \
             {} references updated, {} failed batches in {:.1}s",
            self.table,
            self.target_type,
            self.rows_processed,
            self.rows_inserted,
            self.rows_existing,
            self.rows_failed,
            self.rows_skipped,
            self.references_updated,
            self.batches_failed,
            self.duration_seconds
        )
    }
}

/// What a table migration will do, resolved without touching a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlan {
    pub table: String,
    pub target_type: String,
    pub target_table: String,
    pub id_field: String,
    pub id_strategy: String,
    pub columns: usize,
    pub self_reference: Option<String>,
}

impl fmt::Display for TablePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}), id {} [{}], {} column(s)",
            self.table,
            self.target_type,
            self.target_table,
            self.id_field,
            self.id_strategy,
            self.columns
        )?;
        if let Some(ref field) = self.self_reference {
            write!(f, ", backfill {}", field)?;
        }
        Ok(())
    }
}

/// Tuning shared by every table of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Rows per backfill batch and per post-batch callback.
    pub batch_size: usize,
    /// Reset store-generated id sequences after inserting.
    pub sync_identity: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&MigrationConfig::default())
    }
}

impl From<&MigrationConfig> for OrchestratorOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            sync_identity: config.sync_identity_sequences,
        }
    }
}

/// Migrates one table at a time.
pub struct TableOrchestrator {
    connector: Arc<dyn SourceConnector>,
    store: Arc<dyn TargetStore>,
    raw: Arc<dyn RawWriter>,
    resolver: MetadataResolver,
    options: OrchestratorOptions,
}

impl TableOrchestrator {
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        store: Arc<dyn TargetStore>,
        raw: Arc<dyn RawWriter>,
        resolver: MetadataResolver,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            connector,
            store,
            raw,
            resolver,
            options: OrchestratorOptions {
                batch_size: options.batch_size.max(1),
                ..options
            },
        }
    }

    pub fn options(&self) -> OrchestratorOptions {
        self.options
    }

    /// Migrate one table.
    ///
    /// Returns an error only when the table cannot be migrated at all:
    /// metadata resolution, descriptor validation and the fetch. Row and
    /// batch failures are counted in the summary.
    pub async fn migrate(
        &mut self,
        migration: &TableMigration,
        ctx: &mut MigrationContext,
    ) -> Result<MigrationRunSummary> {
        let span = info_span!(
            "table",
            source = %migration.source_table(),
            target = migration.target_type()
        );
        self.migrate_table(migration, ctx).instrument(span).await
    }

    /// Resolve and validate a table migration without touching a database.
    pub fn plan(&mut self, migration: &TableMigration) -> Result<TablePlan> {
        let meta = self.prepare(migration)?;
        Ok(TablePlan {
            table: migration.name(),
            target_type: meta.type_name.clone(),
            target_table: meta.table.to_string(),
            id_field: meta.id_field.clone(),
            id_strategy: match meta.id_strategy {
                IdStrategy::Assigned => "assigned".to_string(),
                IdStrategy::Generated => "generated".to_string(),
            },
            columns: migration.columns().len(),
            self_reference: migration.self_reference().map(str::to_string),
        })
    }

    async fn migrate_table(
        &mut self,
        migration: &TableMigration,
        ctx: &mut MigrationContext,
    ) -> Result<MigrationRunSummary> {
        let started = Instant::now();
        let mut summary = MigrationRunSummary::new(migration);

        let meta = self.prepare(migration)?;
        let self_ref = deferred_reference(migration, &meta);

        info!("Phase: {}", TablePhase::Fetching);
        let fetched = fetch(self.connector.as_ref(), &FetchRequest::for_migration(migration)).await?;
        summary.rows_fetched = fetched.len() as u64;

        let mut rows: Vec<SourceRow> = Vec::with_capacity(fetched.len());
        for mut row in fetched {
            if !migration.accepts(&row, ctx) {
                summary.rows_skipped += 1;
                continue;
            }
            migration.mutate(&mut row, ctx);
            rows.push(row);
        }

        info!("Phase: {} ({} rows)", TablePhase::Inserting, rows.len());
        self.insert_pass(&rows, migration, &meta, ctx, &mut summary).await;

        if meta.is_generated() && self.options.sync_identity && summary.rows_inserted > 0 {
            if let Err(e) = self.store.sync_identity(&meta.table, &meta.id_column).await {
                warn!("Could not reset id sequence of {}: {}", meta.table, e);
            }
        }

        if let Some(ref self_ref) = self_ref {
            info!("Phase: {} ({})", TablePhase::Backfilling, self_ref.field);
            self.backfill_pass(&rows, migration, &meta, self_ref, &mut summary)
                .await;
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();
        info!("Phase: {}", TablePhase::Done);
        info!("{}", summary);
        Ok(summary)
    }

    async fn insert_pass(
        &self,
        rows: &[SourceRow],
        migration: &TableMigration,
        meta: &TypeMetadata,
        ctx: &mut MigrationContext,
        summary: &mut MigrationRunSummary,
    ) {
        let registry = Arc::clone(self.resolver.registry());
        let processor = RowInsertProcessor::new(self.store.as_ref(), self.raw.as_ref(), &registry);

        for chunk in rows.chunks(self.options.batch_size) {
            let mut ids = Vec::with_capacity(chunk.len());
            for row in chunk {
                summary.rows_processed += 1;
                match processor.insert_row(row, migration, meta).await {
                    InsertOutcome::Inserted(id) => {
                        summary.rows_inserted += 1;
                        ids.push(id);
                    }
                    InsertOutcome::Existing(id) => {
                        summary.rows_existing += 1;
                        ids.push(id);
                    }
                    InsertOutcome::NullId => {}
                    InsertOutcome::Failed => summary.rows_failed += 1,
                }
            }
            if !ids.is_empty() {
                migration.after_batch(&ids, ctx);
            }
        }
    }

    async fn backfill_pass(
        &self,
        rows: &[SourceRow],
        migration: &TableMigration,
        meta: &TypeMetadata,
        self_ref: &ForeignKeyDescriptor,
        summary: &mut MigrationRunSummary,
    ) {
        let processor = BackfillProcessor::new(self.store.as_ref());

        for (index, batch) in rows.chunks(self.options.batch_size).enumerate() {
            match processor.backfill_batch(batch, migration, meta, self_ref).await {
                Ok(updated) => summary.references_updated += updated,
                Err(e) => {
                    summary.batches_failed += 1;
                    error!(
                        "Backfill batch {} (ids {}) of {} rolled back: {}",
                        index + 1,
                        id_range(batch, migration),
                        meta.table,
                        e
                    );
                }
            }
        }
    }

    /// Resolve the target type and check the descriptor against it.
    fn prepare(&mut self, migration: &TableMigration) -> Result<Arc<TypeMetadata>> {
        let meta = self.resolver.resolve(migration.target_type())?;
        let record_type = self.resolver.registry().require(&meta.type_name)?;

        if migration.target_id_field() != meta.id_field {
            return Err(MigrateError::Config(format!(
                "{}: target id field '{}' is not the identity of {} ('{}')",
                migration.name(),
                migration.target_id_field(),
                meta.type_name,
                meta.id_field
            )));
        }

        for mapping in migration.columns() {
            if record_type.find_field(&mapping.field).is_none() {
                return Err(MigrateError::Config(format!(
                    "{}: {} has no field '{}' (mapped from {})",
                    migration.name(),
                    meta.type_name,
                    mapping.field,
                    mapping.source_column
                )));
            }
        }

        match migration.self_reference() {
            Some(field) => {
                let is_self = meta.foreign_key(field).is_some_and(|fk| fk.self_reference);
                if !is_self {
                    return Err(MigrateError::Config(format!(
                        "{}: '{}' is not a self-reference of {}",
                        migration.name(),
                        field,
                        meta.type_name
                    )));
                }
            }
            None => {
                if let Some(ref fk) = meta.self_reference {
                    if migration.column_for(&fk.field).is_some() {
                        warn!(
                            "{} references itself through '{}' but the table does not defer it; \
                             children fetched before their parent will fail",
                            meta.type_name, fk.field
                        );
                    }
                }
            }
        }

        Ok(meta)
    }
}

fn deferred_reference(migration: &TableMigration, meta: &TypeMetadata) -> Option<ForeignKeyDescriptor> {
    migration
        .self_reference()
        .and_then(|field| meta.foreign_key(field))
        .cloned()
}

/// First and last source id of a batch, for log lines.
fn id_range(batch: &[SourceRow], migration: &TableMigration) -> String {
    let mut ids = batch
        .iter()
        .map(|row| row.value(migration.source_id_column()))
        .filter(|v| !v.is_null());
    match (ids.next(), ids.last()) {
        (Some(first), Some(last)) => format!("{}..{}", first, last),
        (Some(only), None) => only.to_string(),
        _ => "-".to_string(),
    }
}
