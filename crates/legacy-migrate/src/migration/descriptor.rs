//! Per-table migration descriptors.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::context::MigrationContext;
use crate::core::convert::ConversionError;
use crate::core::identifier::{validate_identifier, validate_sql_fragment, TableName};
use crate::core::row::SourceRow;
use crate::core::value::{PkValue, SqlValue};
use crate::error::{MigrateError, Result};

/// Decides whether a fetched row takes part in the migration.
pub type RowFilter = Arc<dyn Fn(&SourceRow, &MigrationContext) -> bool + Send + Sync>;

/// Adjusts a fetched row before it is migrated.
pub type RowMutator = Arc<dyn Fn(&mut SourceRow, &MigrationContext) + Send + Sync>;

/// Converts a source value for one field. The output is then coerced to the
/// field's type.
pub type ValueTransform =
    Arc<dyn Fn(&SqlValue) -> std::result::Result<SqlValue, ConversionError> + Send + Sync>;

/// Runs after each insert chunk with the ids that are now in the target.
pub type AfterBatch = Arc<dyn Fn(&[PkValue], &mut MigrationContext) + Send + Sync>;

/// One source column feeding one target field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source_column: String,
    pub field: String,
}

/// Immutable configuration for migrating one legacy table into one record type.
#[derive(Clone)]
pub struct TableMigration {
    source_table: TableName,
    target_type: String,
    source_id_column: String,
    target_id_field: String,
    columns: Vec<ColumnMapping>,
    where_clause: Option<String>,
    order_by: Option<String>,
    max_rows: Option<usize>,
    treat_zero_as_null: bool,
    self_reference: Option<String>,
    row_filter: Option<RowFilter>,
    row_mutator: Option<RowMutator>,
    transforms: HashMap<String, ValueTransform>,
    replacements: HashMap<String, Vec<(SqlValue, SqlValue)>>,
    after_batch: Option<AfterBatch>,
}

impl TableMigration {
    /// Start describing the migration of `source_table` into `target_type`.
    pub fn builder(
        source_table: impl Into<String>,
        target_type: impl Into<String>,
    ) -> TableMigrationBuilder {
        TableMigrationBuilder::new(source_table.into(), target_type.into())
    }

    /// Name used in logs, summaries and table selection.
    pub fn name(&self) -> String {
        self.source_table.to_string()
    }

    pub fn source_table(&self) -> &TableName {
        &self.source_table
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn source_id_column(&self) -> &str {
        &self.source_id_column
    }

    pub fn target_id_field(&self) -> &str {
        &self.target_id_field
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    /// Source column mapped to a field.
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|m| m.field == field)
            .map(|m| m.source_column.as_str())
    }

    /// Columns to select: the id column first, then every mapped column once.
    pub fn requested_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(self.source_id_column.as_str())
            .chain(self.columns.iter().map(|m| m.source_column.as_str()))
            .filter(|c| seen.insert(c.to_ascii_lowercase()))
            .map(str::to_string)
            .collect()
    }

    pub fn where_clause(&self) -> Option<&str> {
        self.where_clause.as_deref()
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.max_rows
    }

    pub fn treat_zero_as_null(&self) -> bool {
        self.treat_zero_as_null
    }

    /// Field holding the self-reference, if the table is self-referencing.
    pub fn self_reference(&self) -> Option<&str> {
        self.self_reference.as_deref()
    }

    pub fn is_self_referencing(&self) -> bool {
        self.self_reference.is_some()
    }

    /// Apply the row filter. Rows are accepted when no filter is set.
    pub fn accepts(&self, row: &SourceRow, ctx: &MigrationContext) -> bool {
        self.row_filter.as_ref().map_or(true, |f| f(row, ctx))
    }

    /// Apply the row mutator, if any.
    pub fn mutate(&self, row: &mut SourceRow, ctx: &MigrationContext) {
        if let Some(ref m) = self.row_mutator {
            m(row, ctx);
        }
    }

    pub fn transform(&self, field: &str) -> Option<&ValueTransform> {
        self.transforms.get(field)
    }

    /// Literal replacements for a field, in declaration order.
    pub fn replacements(&self, field: &str) -> &[(SqlValue, SqlValue)] {
        self.replacements.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run the post-batch callback, if any.
    pub fn after_batch(&self, ids: &[PkValue], ctx: &mut MigrationContext) {
        if let Some(ref cb) = self.after_batch {
            cb(ids, ctx);
        }
    }
}

impl fmt::Debug for TableMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableMigration")
            .field("source_table", &self.source_table)
            .field("target_type", &self.target_type)
            .field("source_id_column", &self.source_id_column)
            .field("target_id_field", &self.target_id_field)
            .field("columns", &self.columns)
            .field("where_clause", &self.where_clause)
            .field("order_by", &self.order_by)
            .field("max_rows", &self.max_rows)
            .field("treat_zero_as_null", &self.treat_zero_as_null)
            .field("self_reference", &self.self_reference)
            .field("row_filter", &self.row_filter.is_some())
            .field("row_mutator", &self.row_mutator.is_some())
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .field("replacements", &self.replacements)
            .field("after_batch", &self.after_batch.is_some())
            .finish()
    }
}

/// Builder for [`TableMigration`].
///
/// Hooks of the same kind compose: filters must all accept, mutators and
/// post-batch callbacks run in the order they were added.
pub struct TableMigrationBuilder {
    source_table: String,
    target_type: String,
    id: Option<(String, String)>,
    columns: Vec<ColumnMapping>,
    where_clause: Option<String>,
    order_by: Option<String>,
    max_rows: Option<usize>,
    treat_zero_as_null: bool,
    self_reference: Option<String>,
    row_filters: Vec<RowFilter>,
    row_mutators: Vec<RowMutator>,
    transforms: HashMap<String, ValueTransform>,
    replacements: HashMap<String, Vec<(SqlValue, SqlValue)>>,
    after_batch: Vec<AfterBatch>,
}

impl TableMigrationBuilder {
    fn new(source_table: String, target_type: String) -> Self {
        Self {
            source_table,
            target_type,
            id: None,
            columns: Vec::new(),
            where_clause: None,
            order_by: None,
            max_rows: None,
            treat_zero_as_null: true,
            self_reference: None,
            row_filters: Vec::new(),
            row_mutators: Vec::new(),
            transforms: HashMap::new(),
            replacements: HashMap::new(),
            after_batch: Vec::new(),
        }
    }

    /// Source id column and the target id field it becomes.
    pub fn id(mut self, source_column: impl Into<String>, field: impl Into<String>) -> Self {
        self.id = Some((source_column.into(), field.into()));
        self
    }

    /// Map a source column to a target field.
    pub fn column(mut self, source_column: impl Into<String>, field: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping {
            source_column: source_column.into(),
            field: field.into(),
        });
        self
    }

    pub fn columns<I, C, F>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (C, F)>,
        C: Into<String>,
        F: Into<String>,
    {
        for (c, f) in mappings {
            self = self.column(c, f);
        }
        self
    }

    /// SQL predicate pushed into the fetch query.
    pub fn where_clause(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Treat numeric zero in reference columns as "no reference". On by default.
    pub fn treat_zero_as_null(mut self, enabled: bool) -> Self {
        self.treat_zero_as_null = enabled;
        self
    }

    /// Mark the table as self-referencing through `field`.
    pub fn self_reference(mut self, field: impl Into<String>) -> Self {
        self.self_reference = Some(field.into());
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&SourceRow, &MigrationContext) -> bool + Send + Sync + 'static,
    {
        self.row_filters.push(Arc::new(filter));
        self
    }

    pub fn mutate<F>(mut self, mutator: F) -> Self
    where
        F: Fn(&mut SourceRow, &MigrationContext) + Send + Sync + 'static,
    {
        self.row_mutators.push(Arc::new(mutator));
        self
    }

    /// Convert a field with `transform` instead of the generic coercion.
    pub fn transform<F>(mut self, field: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&SqlValue) -> std::result::Result<SqlValue, ConversionError> + Send + Sync + 'static,
    {
        self.transforms.insert(field.into(), Arc::new(transform));
        self
    }

    /// Use an already shared transform.
    pub fn transform_with(mut self, field: impl Into<String>, transform: ValueTransform) -> Self {
        self.transforms.insert(field.into(), transform);
        self
    }

    /// Replace `from` with `to` after a field has been converted.
    pub fn replace(
        mut self,
        field: impl Into<String>,
        from: impl Into<SqlValue>,
        to: impl Into<SqlValue>,
    ) -> Self {
        self.replacements
            .entry(field.into())
            .or_default()
            .push((from.into(), to.into()));
        self
    }

    pub fn after_batch<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[PkValue], &mut MigrationContext) + Send + Sync + 'static,
    {
        self.after_batch.push(Arc::new(callback));
        self
    }

    pub fn after_batch_with(mut self, callback: AfterBatch) -> Self {
        self.after_batch.push(callback);
        self
    }

    pub fn mutate_with(mut self, mutator: RowMutator) -> Self {
        self.row_mutators.push(mutator);
        self
    }

    /// Validate and freeze the descriptor.
    pub fn build(self) -> Result<TableMigration> {
        let source_table = TableName::parse(&self.source_table)?;
        let context = |msg: String| MigrateError::Config(format!("{}: {}", source_table, msg));

        let (source_id_column, target_id_field) = self
            .id
            .ok_or_else(|| context("no source id column / target id field given".into()))?;
        validate_identifier(&source_id_column)?;

        let mut fields = HashSet::new();
        for m in &self.columns {
            validate_identifier(&m.source_column)?;
            if !fields.insert(m.field.as_str()) {
                return Err(context(format!(
                    "field '{}' is mapped from more than one column",
                    m.field
                )));
            }
            if m.field == target_id_field && !m.source_column.eq_ignore_ascii_case(&source_id_column)
            {
                return Err(context(format!(
                    "id field '{}' can only be fed by the id column '{}'",
                    m.field, source_id_column
                )));
            }
        }

        if let Some(ref field) = self.self_reference {
            if !fields.contains(field.as_str()) {
                return Err(context(format!(
                    "self-reference field '{}' is not mapped from any column",
                    field
                )));
            }
        }

        if let Some(ref w) = self.where_clause {
            validate_sql_fragment("WHERE", w)?;
        }
        if let Some(ref o) = self.order_by {
            validate_sql_fragment("ORDER BY", o)?;
        }

        let row_filter: Option<RowFilter> = match self.row_filters.len() {
            0 => None,
            1 => self.row_filters.into_iter().next(),
            _ => {
                let filters = self.row_filters;
                Some(Arc::new(move |row: &SourceRow, ctx: &MigrationContext| {
                    filters.iter().all(|f| f(row, ctx))
                }))
            }
        };

        let row_mutator: Option<RowMutator> = match self.row_mutators.len() {
            0 => None,
            1 => self.row_mutators.into_iter().next(),
            _ => {
                let mutators = self.row_mutators;
                Some(Arc::new(move |row: &mut SourceRow, ctx: &MigrationContext| {
                    for m in &mutators {
                        m(row, ctx);
                    }
                }))
            }
        };

        let after_batch: Option<AfterBatch> = match self.after_batch.len() {
            0 => None,
            1 => self.after_batch.into_iter().next(),
            _ => {
                let callbacks = self.after_batch;
                Some(Arc::new(move |ids: &[PkValue], ctx: &mut MigrationContext| {
                    for cb in &callbacks {
                        cb(ids, ctx);
                    }
                }))
            }
        };

        Ok(TableMigration {
            source_table,
            target_type: self.target_type,
            source_id_column,
            target_id_field,
            columns: self.columns,
            where_clause: self.where_clause,
            order_by: self.order_by,
            max_rows: self.max_rows,
            treat_zero_as_null: self.treat_zero_as_null,
            self_reference: self.self_reference,
            row_filter,
            row_mutator,
            transforms: self.transforms,
            replacements: self.replacements,
            after_batch,
        })
    }
}
