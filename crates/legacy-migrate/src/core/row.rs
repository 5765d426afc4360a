//! Materialized legacy rows.

use super::value::{SqlNullType, SqlValue};

static ABSENT: SqlValue = SqlValue::Null(SqlNullType::String);

/// One row read from the legacy store: column name to value, in select order.
///
/// Column lookups ignore ASCII case because configured column names rarely
/// match the casing the legacy catalog reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: Vec<(String, SqlValue)>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Value of a column, `None` when the column was not selected.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    /// Value of a column, treating an absent column as NULL.
    pub fn value(&self, column: &str) -> &SqlValue {
        self.get(column).unwrap_or(&ABSENT)
    }

    /// Set a column, replacing any existing value under the same name.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        let value = value.into();
        match self
            .columns
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column))
        {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for SourceRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = SourceRow::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}
