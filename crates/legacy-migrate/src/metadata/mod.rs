//! Target type metadata resolution.
//!
//! Turns a [`RecordType`] from the registry into what the processors need:
//! the identity field and how it is normally assigned, the physical table,
//! every reference field and at most one self-reference.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::identifier::{validate_identifier, TableName};
use crate::core::record::{id_type_of, FieldKind, FieldType, RecordType, TypeRegistry};
use crate::error::{MigrateError, Result};

/// How a record type's identity is normally assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// The caller supplies the id; writes go through merge.
    Assigned,
    /// The store generates the id; migration writes bypass generation.
    Generated,
}

/// One reference field of a target record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    /// Field name on the referencing type.
    pub field: String,
    /// Physical column the field maps to.
    pub column: String,
    /// Referenced record type.
    pub referenced_type: String,
    /// Type of the referenced record's id, which is what the column stores.
    pub referenced_id_type: FieldType,
    /// The field references the type it is declared on.
    pub self_reference: bool,
}

/// Resolved metadata for one target record type.
#[derive(Debug, Clone)]
pub struct TypeMetadata {
    pub type_name: String,
    /// Physical table, schema-qualified.
    pub table: TableName,
    pub id_field: String,
    pub id_column: String,
    pub id_type: FieldType,
    pub id_strategy: IdStrategy,
    /// Every reference field, in declaration order.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// The self-reference, if the type has one.
    pub self_reference: Option<ForeignKeyDescriptor>,
}

impl TypeMetadata {
    /// Reference descriptor of a field, if the field is a reference.
    pub fn foreign_key(&self, field: &str) -> Option<&ForeignKeyDescriptor> {
        self.foreign_keys.iter().find(|fk| fk.field == field)
    }

    pub fn is_foreign_key(&self, field: &str) -> bool {
        self.foreign_key(field).is_some()
    }

    pub fn is_generated(&self) -> bool {
        self.id_strategy == IdStrategy::Generated
    }
}

/// Resolves and caches [`TypeMetadata`] from a [`TypeRegistry`].
pub struct MetadataResolver {
    registry: Arc<TypeRegistry>,
    default_schema: String,
    cache: HashMap<String, Arc<TypeMetadata>>,
}

impl MetadataResolver {
    /// Create a resolver. Tables of types without a schema land in `default_schema`.
    pub fn new(registry: Arc<TypeRegistry>, default_schema: impl Into<String>) -> Self {
        Self {
            registry,
            default_schema: default_schema.into(),
            cache: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Resolve a record type by name.
    ///
    /// Fails with a configuration error when the type is unknown, has no
    /// identity field, has more than one, or its identity has a type that
    /// cannot act as a key.
    pub fn resolve(&mut self, type_name: &str) -> Result<Arc<TypeMetadata>> {
        if let Some(meta) = self.cache.get(type_name) {
            return Ok(Arc::clone(meta));
        }

        let record_type = self.registry.require(type_name)?;
        let meta = Arc::new(build_metadata(
            &self.registry,
            record_type,
            &self.default_schema,
        )?);

        debug!(
            "Resolved {}: table {}, id {} ({:?}, {:?}), {} reference(s)",
            meta.type_name,
            meta.table,
            meta.id_field,
            meta.id_type,
            meta.id_strategy,
            meta.foreign_keys.len()
        );

        self.cache.insert(type_name.to_string(), Arc::clone(&meta));
        Ok(meta)
    }

    /// Drop all cached metadata.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn build_metadata(
    registry: &TypeRegistry,
    record_type: &RecordType,
    default_schema: &str,
) -> Result<TypeMetadata> {
    let mut id_fields = record_type.fields.iter().filter(|f| f.id && !f.transient);
    let id = id_fields.next().ok_or_else(|| {
        MigrateError::Config(format!(
            "record type '{}' has no identity field",
            record_type.name
        ))
    })?;
    if let Some(extra) = id_fields.next() {
        return Err(MigrateError::Config(format!(
            "record type '{}' declares more than one identity field ('{}' and '{}')",
            record_type.name, id.name, extra.name
        )));
    }

    let id_type = id_type_of(registry, record_type)?;
    if !id_type.can_be_identity() {
        return Err(MigrateError::Config(format!(
            "identity field '{}.{}' has type {:?}; identities must be integer, uuid or text",
            record_type.name, id.name, id_type
        )));
    }

    validate_identifier(&record_type.table)?;
    let table = TableName::new(
        Some(record_type.schema.as_deref().unwrap_or(default_schema)),
        &record_type.table,
    );

    let mut foreign_keys = Vec::new();
    for field in record_type.fields.iter().filter(|f| !f.transient) {
        validate_identifier(field.column_name())?;
        if field.id {
            continue;
        }
        if let FieldKind::Reference { target } = field.kind()? {
            let referenced = registry.require(&target)?;
            let referenced_id_type = if referenced.name == record_type.name {
                id_type
            } else {
                id_type_of(registry, referenced)?
            };
            foreign_keys.push(ForeignKeyDescriptor {
                field: field.name.clone(),
                column: field.column_name().to_string(),
                referenced_type: target.clone(),
                referenced_id_type,
                self_reference: target == record_type.name,
            });
        }
    }

    let mut self_refs = foreign_keys.iter().filter(|fk| fk.self_reference);
    let self_reference = self_refs.next().cloned();
    let ignored: Vec<&str> = self_refs.map(|fk| fk.field.as_str()).collect();
    if let Some(ref first) = self_reference {
        if !ignored.is_empty() {
            warn!(
                "Record type {} has several self-references; using '{}', ignoring {:?}",
                record_type.name, first.field, ignored
            );
        }
    }

    Ok(TypeMetadata {
        type_name: record_type.name.clone(),
        table,
        id_field: id.name.clone(),
        id_column: id.column_name().to_string(),
        id_type,
        id_strategy: if id.generated {
            IdStrategy::Generated
        } else {
            IdStrategy::Assigned
        },
        foreign_keys,
        self_reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::FieldDef;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::from_types([
                RecordType::new("Country", "country")
                    .in_schema("ref")
                    .field(FieldDef::scalar("code", FieldType::Text).id())
                    .field(FieldDef::scalar("name", FieldType::Text)),
                RecordType::new("Category", "category")
                    .field(FieldDef::scalar("id", FieldType::Int64).id().generated())
                    .field(FieldDef::reference("parent", "Category").column("parent_id"))
                    .field(FieldDef::reference("origin", "Country").column("origin_code"))
                    .field(FieldDef::scalar("title", FieldType::Text)),
                RecordType::new("Orphan", "orphan").field(FieldDef::scalar("name", FieldType::Text)),
                RecordType::new("Measured", "measured")
                    .field(FieldDef::scalar("value", FieldType::Float64).id()),
                RecordType::new("Tree", "tree")
                    .field(FieldDef::scalar("id", FieldType::Int32).id())
                    .field(FieldDef::reference("parent", "Tree"))
                    .field(FieldDef::reference("root", "Tree")),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_resolve_generated_self_referencing_type() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        let meta = resolver.resolve("Category").unwrap();

        assert_eq!(meta.table.to_string(), "public.category");
        assert_eq!(meta.id_field, "id");
        assert_eq!(meta.id_type, FieldType::Int64);
        assert_eq!(meta.id_strategy, IdStrategy::Generated);
        assert_eq!(meta.foreign_keys.len(), 2);

        let origin = meta.foreign_key("origin").unwrap();
        assert_eq!(origin.column, "origin_code");
        assert_eq!(origin.referenced_id_type, FieldType::Text);
        assert!(!origin.self_reference);

        let parent = meta.self_reference.as_ref().unwrap();
        assert_eq!(parent.field, "parent");
        assert_eq!(parent.column, "parent_id");
        assert_eq!(parent.referenced_id_type, FieldType::Int64);
    }

    #[test]
    fn test_resolve_assigned_type_in_own_schema() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        let meta = resolver.resolve("Country").unwrap();
        assert_eq!(meta.table.to_string(), "ref.country");
        assert_eq!(meta.id_strategy, IdStrategy::Assigned);
        assert!(meta.self_reference.is_none());
        assert!(!meta.is_foreign_key("name"));
    }

    #[test]
    fn test_missing_identity_is_config_error() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        let err = resolver.resolve("Orphan").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("no identity field"));
    }

    #[test]
    fn test_float_identity_rejected() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        assert!(resolver.resolve("Measured").unwrap_err().is_config());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        assert!(resolver.resolve("Nope").unwrap_err().is_config());
    }

    #[test]
    fn test_first_self_reference_wins() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        let meta = resolver.resolve("Tree").unwrap();
        assert_eq!(meta.self_reference.as_ref().unwrap().field, "parent");
        assert_eq!(meta.foreign_keys.len(), 2);
    }

    #[test]
    fn test_metadata_is_cached() {
        let mut resolver = MetadataResolver::new(registry(), "public");
        let a = resolver.resolve("Category").unwrap();
        let b = resolver.resolve("Category").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        resolver.clear();
        let c = resolver.resolve("Category").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
