//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::core::identifier::{validate_identifier, validate_sql_fragment, TableName};
use crate::drivers::common::SslMode;
use crate::drivers::SourceDriver;
use crate::error::{MigrateError, Result};
use crate::migration::builtins::named_transform;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    SourceDriver::parse(&config.source.driver)?;
    if config.source.url.trim().is_empty() {
        return Err(MigrateError::Config("source.url is required".into()));
    }
    SslMode::parse(&config.source.ssl_mode)?;

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.max_connections == 0 {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }
    validate_identifier(&config.target.schema)?;
    SslMode::parse(&config.target.ssl_mode)?;

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }

    // Record types
    let mut type_names = HashSet::new();
    for t in &config.types {
        if !type_names.insert(t.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "record type '{}' is declared more than once",
                t.name
            )));
        }
        validate_identifier(&t.table)?;
        if let Some(ref schema) = t.schema {
            validate_identifier(schema)?;
        }

        let mut field_names = HashSet::new();
        for f in &t.fields {
            if !field_names.insert(f.name.as_str()) {
                return Err(MigrateError::Config(format!(
                    "record type '{}' declares field '{}' more than once",
                    t.name, f.name
                )));
            }
            validate_identifier(f.column_name())?;
            f.kind()?;
        }
    }
    for t in &config.types {
        for f in &t.fields {
            if let Some(ref target) = f.references {
                if !type_names.contains(target.as_str()) {
                    return Err(MigrateError::Config(format!(
                        "field '{}.{}' references unknown record type '{}'",
                        t.name, f.name, target
                    )));
                }
            }
        }
    }

    // Id maps
    for (name, entries) in &config.id_maps {
        for (from, to) in entries {
            if to.to_pk_value().is_none() {
                return Err(MigrateError::Config(format!(
                    "id map '{}' maps '{}' to a value that is not an integer or text id",
                    name, from
                )));
            }
        }
    }

    // Tables
    for table in &config.tables {
        TableName::parse(&table.source)?;
        if !type_names.contains(table.target.as_str()) {
            return Err(MigrateError::Config(format!(
                "table '{}' targets unknown record type '{}'",
                table.source, table.target
            )));
        }
        validate_identifier(&table.source_id)?;

        let mut targets = HashSet::new();
        for (column, field) in &table.columns {
            validate_identifier(column)?;
            if !targets.insert(field.as_str()) {
                return Err(MigrateError::Config(format!(
                    "table '{}' maps more than one column to field '{}'",
                    table.source, field
                )));
            }
        }

        if let Some(ref w) = table.where_clause {
            validate_sql_fragment("WHERE", w)?;
        }
        if let Some(ref o) = table.order_by {
            validate_sql_fragment("ORDER BY", o)?;
        }

        for spec in table.transforms.values() {
            for name in spec.names() {
                named_transform(name)?;
            }
        }

        for (column, map) in &table.remap {
            validate_identifier(column)?;
            if !config.id_maps.contains_key(map) {
                return Err(MigrateError::Config(format!(
                    "table '{}' remaps {} through unknown id map '{}'",
                    table.source, column, map
                )));
            }
        }
    }

    Ok(())
}
