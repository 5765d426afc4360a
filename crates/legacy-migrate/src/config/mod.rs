//! Configuration loading, validation and conversion into runtime objects.

mod types;
mod validation;

pub use types::*;

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::core::record::TypeRegistry;
use crate::core::value::{PkValue, SqlValue};
use crate::error::{MigrateError, Result};
use crate::migration::builtins::{named_transform, null_if_missing, record_ids, remap};
use crate::migration::{MigrationContext, TableMigration, ValueTransform};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 fingerprint of the effective configuration, logged at start so
    /// runs can be correlated.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Build the record type registry.
    pub fn registry(&self) -> Result<TypeRegistry> {
        TypeRegistry::from_types(self.types.iter().cloned())
    }

    /// Build the table descriptors, in run order.
    pub fn migrations(&self) -> Result<Vec<TableMigration>> {
        self.tables.iter().map(TableConfig::to_migration).collect()
    }

    /// A fresh run context holding the configured id maps.
    ///
    /// Map keys are legacy ids as text, so `"007"` and `"7"` are different
    /// entries; a numeric source value finds the key spelled as its digits.
    pub fn context(&self) -> Result<MigrationContext> {
        let mut ctx = MigrationContext::new();
        for (name, entries) in &self.id_maps {
            for (from, to) in entries {
                let to = to.to_pk_value().ok_or_else(|| {
                    MigrateError::Config(format!(
                        "id map '{}' maps '{}' to a value that is not an integer or text id",
                        name, from
                    ))
                })?;
                ctx.map_id(name, PkValue::String(from.clone()), to);
            }
        }
        Ok(ctx)
    }
}

impl TableConfig {
    /// Build the runtime descriptor, resolving named transforms and hooks.
    pub fn to_migration(&self) -> Result<TableMigration> {
        let mut builder = TableMigration::builder(&self.source, &self.target)
            .id(&self.source_id, &self.target_id)
            .columns(self.columns.iter())
            .treat_zero_as_null(self.treat_zero_as_null);

        if let Some(ref w) = self.where_clause {
            builder = builder.where_clause(w);
        }
        if let Some(ref o) = self.order_by {
            builder = builder.order_by(o);
        }
        if let Some(n) = self.max_rows {
            builder = builder.max_rows(n);
        }
        if let Some(ref field) = self.self_reference {
            builder = builder.self_reference(field);
        }

        for (field, spec) in &self.transforms {
            builder = builder.transform_with(field, chain_transforms(&spec.names())?);
        }

        for (field, replacements) in &self.replacements {
            for r in replacements {
                let to = r.to.as_ref().map(SqlValue::from).unwrap_or(SqlValue::NULL);
                builder = builder.replace(field, SqlValue::from(&r.from), to);
            }
        }

        for (column, set) in &self.skip_if_missing {
            let (column, set) = (column.clone(), set.clone());
            builder = builder.filter(move |row, ctx| {
                let value = row.value(&column);
                value.is_null() || ctx.contains_value(&set, value)
            });
        }

        for (column, map) in &self.remap {
            builder = builder.mutate_with(remap(column, map));
        }

        for (column, set) in &self.null_if_missing {
            builder = builder.mutate_with(null_if_missing(column, set));
        }

        if let Some(ref set) = self.record_ids {
            builder = builder.after_batch_with(record_ids(set));
        }

        builder.build()
    }
}

fn chain_transforms(names: &[&str]) -> Result<ValueTransform> {
    let mut steps = names
        .iter()
        .map(|n| named_transform(n))
        .collect::<Result<Vec<_>>>()?;
    if steps.len() == 1 {
        return Ok(steps.remove(0));
    }
    Ok(Arc::new(move |value: &SqlValue| {
        steps
            .iter()
            .try_fold(value.clone(), |acc, step| step(&acc))
    }))
}
