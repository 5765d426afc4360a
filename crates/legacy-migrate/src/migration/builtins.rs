//! Named transformers and hooks available to declarative table descriptors.

use std::sync::Arc;

use tracing::debug;

use super::context::MigrationContext;
use super::descriptor::{AfterBatch, RowMutator, ValueTransform};
use crate::core::convert::ConversionError;
use crate::core::record::FieldType;
use crate::core::row::SourceRow;
use crate::core::value::{PkValue, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};

/// Names accepted by [`named_transform`].
pub const TRANSFORM_NAMES: &[&str] = &["trim", "upper", "lower", "empty_as_null", "yn_bool"];

/// Look up a built-in transformer by name.
pub fn named_transform(name: &str) -> Result<ValueTransform> {
    let transform: ValueTransform = match name {
        "trim" => Arc::new(trim),
        "upper" => Arc::new(upper),
        "lower" => Arc::new(lower),
        "empty_as_null" => Arc::new(empty_as_null),
        "yn_bool" => Arc::new(yn_bool),
        other => {
            return Err(MigrateError::Config(format!(
                "unknown transform '{}' (expected one of: {})",
                other,
                TRANSFORM_NAMES.join(", ")
            )))
        }
    };
    Ok(transform)
}

type TransformResult = std::result::Result<SqlValue, ConversionError>;

fn trim(value: &SqlValue) -> TransformResult {
    Ok(map_text(value, |s| s.trim().to_string()))
}

fn upper(value: &SqlValue) -> TransformResult {
    Ok(map_text(value, str::to_uppercase))
}

fn lower(value: &SqlValue) -> TransformResult {
    Ok(map_text(value, str::to_lowercase))
}

fn map_text(value: &SqlValue, f: impl Fn(&str) -> String) -> SqlValue {
    match value {
        SqlValue::Text(s) => SqlValue::Text(f(s)),
        other => other.clone(),
    }
}

fn empty_as_null(value: &SqlValue) -> TransformResult {
    Ok(match value {
        SqlValue::Text(s) if s.trim().is_empty() => SqlValue::Null(SqlNullType::String),
        other => other.clone(),
    })
}

/// Legacy `Y`/`N` flag columns: `Y` (any case) is true, any other non-null
/// text is false. Numbers follow the usual nonzero rule.
fn yn_bool(value: &SqlValue) -> TransformResult {
    match value {
        SqlValue::Null(_) => Ok(SqlValue::Null(SqlNullType::Bool)),
        SqlValue::Bool(b) => Ok(SqlValue::Bool(*b)),
        SqlValue::Text(s) => Ok(SqlValue::Bool(s.trim().eq_ignore_ascii_case("y"))),
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) | SqlValue::Decimal(_) => {
            Ok(SqlValue::Bool(!value.is_numeric_zero()))
        }
        other => Err(ConversionError::new(other, FieldType::Bool, "not a Y/N flag")),
    }
}

/// Post-batch callback recording the batch's ids into a named set.
pub fn record_ids(set: impl Into<String>) -> AfterBatch {
    let set = set.into();
    Arc::new(move |ids: &[PkValue], ctx: &mut MigrationContext| {
        ctx.record_ids(&set, ids.iter().cloned());
    })
}

/// Row mutator nulling `column` when its value is not an id in the named set.
///
/// Used for references into tables whose rows were filtered out or failed.
pub fn null_if_missing(column: impl Into<String>, set: impl Into<String>) -> RowMutator {
    let column = column.into();
    let set = set.into();
    Arc::new(move |row: &mut SourceRow, ctx: &MigrationContext| {
        let value = row.value(&column);
        if value.is_null() || ctx.contains_value(&set, value) {
            return;
        }
        debug!("Nulling {} = {}: not in id set '{}'", column, value, set);
        let null = SqlValue::Null(value.null_type());
        row.set(column.as_str(), null);
    })
}

/// Row mutator replacing `column` with the id a named map holds for it.
///
/// Values the map does not know are left as they are.
pub fn remap(column: impl Into<String>, map: impl Into<String>) -> RowMutator {
    let column = column.into();
    let map = map.into();
    Arc::new(move |row: &mut SourceRow, ctx: &MigrationContext| {
        let value = row.value(&column);
        if value.is_null() {
            return;
        }
        if let Some(to) = ctx.mapped_value(&map, value) {
            debug!("Remapping {} = {} to {} through id map '{}'", column, value, to, map);
            let to = SqlValue::from(to);
            row.set(column.as_str(), to);
        }
    })
}
