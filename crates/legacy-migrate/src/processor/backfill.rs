//! Pass 2: fill in self-references once every row of the table exists.

use tracing::{debug, warn};

use super::convert_field;
use crate::core::convert::coerce;
use crate::core::row::SourceRow;
use crate::core::traits::{ReferenceUpdate, TargetStore};
use crate::error::Result;
use crate::metadata::{ForeignKeyDescriptor, TypeMetadata};
use crate::migration::TableMigration;

/// Applies deferred self-references one batch at a time.
pub struct BackfillProcessor<'a> {
    store: &'a dyn TargetStore,
}

impl<'a> BackfillProcessor<'a> {
    pub fn new(store: &'a dyn TargetStore) -> Self {
        Self { store }
    }

    /// Set the self-reference of every row in `rows` that has one.
    ///
    /// All updates of the batch go to the store as one transaction, so an
    /// error means none of them were applied. Rows without a usable id or
    /// parent value contribute nothing. Returns the number of rows updated.
    pub async fn backfill_batch(
        &self,
        rows: &[SourceRow],
        migration: &TableMigration,
        meta: &TypeMetadata,
        self_ref: &ForeignKeyDescriptor,
    ) -> Result<u64> {
        let Some(parent_column) = migration.column_for(&self_ref.field) else {
            return Ok(0);
        };

        let mut updates = Vec::new();
        for row in rows {
            let source_id = row.value(migration.source_id_column());
            if source_id.is_null() {
                continue;
            }
            let Ok(id) = coerce(source_id, meta.id_type) else {
                continue;
            };

            let parent = row.value(parent_column);
            if parent.is_null() || (migration.treat_zero_as_null() && parent.is_numeric_zero()) {
                continue;
            }

            let reference = match convert_field(migration, &self_ref.field, parent, self_ref.referenced_id_type) {
                Ok(v) if v.is_null() => continue,
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "Row {}={}: {} not backfilled: {}",
                        migration.source_id_column(),
                        source_id,
                        self_ref.field,
                        e
                    );
                    continue;
                }
            };

            updates.push(ReferenceUpdate { id, reference });
        }

        if updates.is_empty() {
            return Ok(0);
        }

        let updated = self
            .store
            .update_references(&meta.table, &self_ref.column, &meta.id_column, &updates)
            .await?;
        debug!(
            "Backfilled {} of {} {} reference(s) on {}",
            updated,
            updates.len(),
            self_ref.field,
            meta.table
        );
        Ok(updated)
    }
}
