//! Row and batch processors.
//!
//! - [`RowInsertProcessor`]: pass 1, one source row at a time
//! - [`BackfillProcessor`]: pass 2, self-references in fixed-size batches
//!
//! Both passes convert a mapped source value the same way: the field's
//! transform when one is configured, otherwise generic coercion, followed by
//! the field's literal replacements.

mod backfill;
mod insert;

pub use backfill::BackfillProcessor;
pub use insert::{InsertOutcome, RowInsertProcessor};

use crate::core::convert::{coerce, ConversionError};
use crate::core::record::FieldType;
use crate::core::value::SqlValue;
use crate::migration::TableMigration;

/// Convert one source value for `field`.
pub(crate) fn convert_field(
    migration: &TableMigration,
    field: &str,
    value: &SqlValue,
    field_type: FieldType,
) -> Result<SqlValue, ConversionError> {
    let converted = match migration.transform(field) {
        Some(transform) => coerce(&transform(value)?, field_type)?,
        None => coerce(value, field_type)?,
    };
    apply_replacements(converted, migration.replacements(field), field_type)
}

/// Replace a converted value by the first literal pair whose `from` equals it.
///
/// Both sides are converted to the field type first, so `1`, `"1"` and
/// `1.0` all match an integer field holding 1. Pairs whose `from` cannot be
/// converted never match.
fn apply_replacements(
    value: SqlValue,
    replacements: &[(SqlValue, SqlValue)],
    field_type: FieldType,
) -> Result<SqlValue, ConversionError> {
    for (from, to) in replacements {
        let Ok(from) = coerce(from, field_type) else {
            continue;
        };
        let matched = if from.is_null() {
            value.is_null()
        } else {
            from == value
        };
        if matched {
            return coerce(to, field_type);
        }
    }
    Ok(value)
}
