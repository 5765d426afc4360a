//! Pass 1: insert one source row as a target record, keeping its id.

use tracing::{debug, warn};

use super::convert_field;
use crate::core::convert::coerce;
use crate::core::record::{FieldMapper, RegistryMapper, TypeRegistry};
use crate::core::row::SourceRow;
use crate::core::traits::{ColumnValue, RawWriter, TargetStore};
use crate::core::value::{PkValue, SqlValue};
use crate::error::{MigrateError, Result};
use crate::metadata::TypeMetadata;
use crate::migration::TableMigration;

/// What happened to one source row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new target record was written.
    Inserted(PkValue),
    /// A record with this id was already present.
    Existing(PkValue),
    /// The source id was NULL; nothing was written.
    NullId,
    /// Conversion or persistence failed; nothing was written.
    Failed,
}

impl InsertOutcome {
    /// Inserted, already present, or deliberately skipped.
    pub fn is_success(&self) -> bool {
        !matches!(self, InsertOutcome::Failed)
    }

    /// Id of the record now present in the target.
    pub fn id(&self) -> Option<&PkValue> {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => Some(id),
            _ => None,
        }
    }
}

/// Inserts source rows one at a time.
///
/// Every write is a single statement, so each row commits or fails on its
/// own and a failure never touches another row.
pub struct RowInsertProcessor<'a> {
    store: &'a dyn TargetStore,
    raw: &'a dyn RawWriter,
    registry: &'a TypeRegistry,
}

impl<'a> RowInsertProcessor<'a> {
    pub fn new(store: &'a dyn TargetStore, raw: &'a dyn RawWriter, registry: &'a TypeRegistry) -> Self {
        Self {
            store,
            raw,
            registry,
        }
    }

    /// Insert one row. Errors are logged with the source id and reported as
    /// [`InsertOutcome::Failed`].
    pub async fn insert_row(
        &self,
        row: &SourceRow,
        migration: &TableMigration,
        meta: &TypeMetadata,
    ) -> InsertOutcome {
        let source_id = row.value(migration.source_id_column());
        if source_id.is_null() {
            debug!("Skipping row with NULL {}", migration.source_id_column());
            return InsertOutcome::NullId;
        }

        match self.try_insert(row, source_id, migration, meta).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Row {}={} of {} failed: {}",
                    migration.source_id_column(),
                    source_id,
                    migration.name(),
                    e
                );
                InsertOutcome::Failed
            }
        }
    }

    async fn try_insert(
        &self,
        row: &SourceRow,
        source_id: &SqlValue,
        migration: &TableMigration,
        meta: &TypeMetadata,
    ) -> Result<InsertOutcome> {
        let id = coerce(source_id, meta.id_type).map_err(|e| MigrateError::Conversion {
            field: meta.id_field.clone(),
            message: e.to_string(),
        })?;
        let pk = PkValue::from_value(&id).ok_or_else(|| MigrateError::Conversion {
            field: meta.id_field.clone(),
            message: format!("{} cannot be used as an id", id),
        })?;

        if self.store.exists(&meta.table, &meta.id_column, &id).await? {
            debug!("{} {} already present", meta.type_name, pk);
            return Ok(InsertOutcome::Existing(pk));
        }

        let mapper = RegistryMapper::new(self.registry, self.registry.require(&meta.type_name)?);
        let mut record = mapper.instantiate();
        mapper.set_field(&mut record, &meta.id_field, id)?;

        for mapping in migration.columns() {
            let field = mapping.field.as_str();
            if field == meta.id_field || migration.self_reference() == Some(field) {
                continue;
            }

            let value = row.value(&mapping.source_column);
            if migration.treat_zero_as_null() && meta.is_foreign_key(field) && value.is_numeric_zero() {
                continue;
            }

            let field_type = mapper.field_type(field)?;
            match convert_field(migration, field, value, field_type) {
                Ok(converted) => mapper.set_field(&mut record, field, converted)?,
                Err(e) => warn!(
                    "Row {}={}: field {} left unset: {}",
                    migration.source_id_column(),
                    source_id,
                    field,
                    e
                ),
            }
        }

        if let Some(field) = migration.self_reference() {
            record.unset(field);
        }

        let mut columns = Vec::new();
        for def in mapper.persistable_fields() {
            let value = match record.get(&def.name) {
                Some(v) => v.clone(),
                None => mapper.field_type(&def.name)?.null(),
            };
            columns.push(ColumnValue::new(def.column_name(), value));
        }

        if meta.is_generated() {
            self.raw.insert_raw(&meta.table, &columns).await?;
        } else {
            self.store.merge(&meta.table, &meta.id_column, &columns).await?;
        }

        debug!("Inserted {} {}", meta.type_name, pk);
        Ok(InsertOutcome::Inserted(pk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataResolver;
    use crate::test_support::{self, MemoryTarget};
    use std::sync::Arc;

    fn resolve(name: &str) -> (Arc<TypeRegistry>, Arc<TypeMetadata>) {
        let registry = Arc::new(test_support::registry());
        let mut resolver = MetadataResolver::new(Arc::clone(&registry), "app");
        let meta = resolver.resolve(name).unwrap();
        (registry, meta)
    }

    fn row(pairs: &[(&str, SqlValue)]) -> SourceRow {
        pairs.iter().map(|(c, v)| (*c, v.clone())).collect()
    }

    async fn insert(
        target: &MemoryTarget,
        migration: &TableMigration,
        source: SourceRow,
    ) -> InsertOutcome {
        let (registry, meta) = resolve(migration.target_type());
        RowInsertProcessor::new(target, target, &registry)
            .insert_row(&source, migration, &meta)
            .await
    }

    #[tokio::test]
    async fn test_generated_id_is_forced() {
        let target = test_support::target();
        let migration = test_support::category_migration();
        let outcome = insert(
            &target,
            &migration,
            row(&[
                ("CAT_ID", SqlValue::I32(42)),
                ("CAT_NAME", "Tools".into()),
                ("PARENT_ID", SqlValue::I32(7)),
                ("OWNER_CODE", SqlValue::NULL),
            ]),
        )
        .await;

        assert_eq!(outcome, InsertOutcome::Inserted(PkValue::Int(42)));
        assert_eq!(target.raw_inserts(), 1);
        assert_eq!(target.merges(), 0);
        assert_eq!(target.value("app.category", 42, "id"), Some(SqlValue::I64(42)));
        assert_eq!(
            target.value("app.category", 42, "name"),
            Some(SqlValue::Text("Tools".into()))
        );
        // Deferred to the backfill pass.
        assert!(target.value("app.category", 42, "parent_id").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_existing_row_is_not_rewritten() {
        let target = test_support::target().with_row(
            "app.category",
            5,
            &[("id", SqlValue::I64(5)), ("name", "Old".into())],
        );
        let migration = test_support::category_migration();
        let outcome = insert(
            &target,
            &migration,
            row(&[("CAT_ID", SqlValue::Text("5".into())), ("CAT_NAME", "New".into())]),
        )
        .await;

        assert_eq!(outcome, InsertOutcome::Existing(PkValue::Int(5)));
        assert!(outcome.is_success());
        assert_eq!(target.raw_inserts(), 0);
        assert_eq!(
            target.value("app.category", 5, "name"),
            Some(SqlValue::Text("Old".into()))
        );
    }

    #[tokio::test]
    async fn test_null_id_is_skipped() {
        let target = test_support::target();
        let outcome = insert(
            &target,
            &test_support::category_migration(),
            row(&[("CAT_ID", SqlValue::NULL), ("CAT_NAME", "Ghost".into())]),
        )
        .await;

        assert_eq!(outcome, InsertOutcome::NullId);
        assert!(outcome.is_success());
        assert_eq!(target.probes(), 0);
    }

    #[tokio::test]
    async fn test_unconvertible_id_fails_row() {
        let target = test_support::target();
        let outcome = insert(
            &target,
            &test_support::category_migration(),
            row(&[("CAT_ID", "A-17".into()), ("CAT_NAME", "Bad".into())]),
        )
        .await;

        assert_eq!(outcome, InsertOutcome::Failed);
        assert_eq!(target.row_count("app.category"), 0);
    }

    #[tokio::test]
    async fn test_zero_reference_becomes_null() {
        let target = test_support::target();
        let migration = TableMigration::builder("dbo.T_CATEGORY", "Category")
            .id("CAT_ID", "id")
            .column("PARENT_ID", "parent")
            .build()
            .unwrap();

        insert(
            &target,
            &migration,
            row(&[("CAT_ID", SqlValue::I32(5)), ("PARENT_ID", SqlValue::I32(0))]),
        )
        .await;

        assert!(target.value("app.category", 5, "parent_id").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_zero_reference_kept_when_disabled() {
        let target = test_support::target();
        let migration = TableMigration::builder("dbo.T_CATEGORY", "Category")
            .id("CAT_ID", "id")
            .column("PARENT_ID", "parent")
            .treat_zero_as_null(false)
            .build()
            .unwrap();

        insert(
            &target,
            &migration,
            row(&[("CAT_ID", SqlValue::I32(5)), ("PARENT_ID", SqlValue::I32(0))]),
        )
        .await;

        assert_eq!(target.value("app.category", 5, "parent_id"), Some(SqlValue::I64(0)));
    }

    #[tokio::test]
    async fn test_bad_field_is_left_unset() {
        let target = test_support::target();
        let migration = TableMigration::builder("dbo.T_CATEGORY", "Category")
            .id("CAT_ID", "id")
            .column("CAT_NAME", "name")
            .column("ACTIVE", "active")
            .build()
            .unwrap();

        let outcome = insert(
            &target,
            &migration,
            row(&[
                ("CAT_ID", SqlValue::I32(8)),
                ("CAT_NAME", "Paint".into()),
                ("ACTIVE", "maybe".into()),
            ]),
        )
        .await;

        assert_eq!(outcome, InsertOutcome::Inserted(PkValue::Int(8)));
        assert_eq!(
            target.value("app.category", 8, "name"),
            Some(SqlValue::Text("Paint".into()))
        );
        assert!(target.value("app.category", 8, "active").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_assigned_id_uses_merge() {
        let target = test_support::target();
        let migration = TableMigration::builder("dbo.OWNER", "Owner")
            .id("OWNER_CODE", "code")
            .column("OWNER_NAME", "name")
            .replace("name", "UNKNOWN", SqlValue::NULL)
            .build()
            .unwrap();

        let outcome = insert(
            &target,
            &migration,
            row(&[("OWNER_CODE", " acme ".into()), ("OWNER_NAME", "UNKNOWN".into())]),
        )
        .await;

        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
        assert_eq!(target.merges(), 1);
        assert_eq!(target.raw_inserts(), 0);
        let id = outcome.id().unwrap().clone();
        assert!(target.value("app.owner", id, "name").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_write_failure_fails_row() {
        let target = test_support::target().fail_write(3);
        let outcome = insert(
            &target,
            &test_support::category_migration(),
            row(&[("CAT_ID", SqlValue::I64(3)), ("CAT_NAME", "X".into())]),
        )
        .await;

        assert_eq!(outcome, InsertOutcome::Failed);
        assert!(!outcome.is_success());
        assert!(!target.contains("app.category", 3));
    }
}
