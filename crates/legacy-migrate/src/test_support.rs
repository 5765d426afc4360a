//! In-memory legacy source and target store for tests.
//!
//! `MemorySource` understands exactly the SELECT the PostgreSQL dialect
//! builds: it projects the selected columns and honours `LIMIT`, but does
//! not evaluate `WHERE` or `ORDER BY`. Catalog lookups ignore case; queried
//! table names are resolved case-sensitively, as quoted identifiers are.
//! `MemoryTarget` keeps rows per table keyed by id and enforces the two
//! constraints the engine cares about: unique ids on insert and an existing
//! parent on self-reference updates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::identifier::TableName;
use crate::core::record::{FieldDef, FieldType, RecordType, TypeRegistry};
use crate::core::row::SourceRow;
use crate::core::traits::{
    ColumnValue, Dialect, RawWriter, ReferenceUpdate, SourceConnection, SourceConnector,
    SourceTable, TargetStore,
};
use crate::core::value::{PkValue, SqlValue};
use crate::drivers::PostgresDialect;
use crate::error::{MigrateError, Result};
use crate::migration::TableMigration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn table_key(table: &TableName) -> String {
    table.to_string().to_lowercase()
}

// ===== source =====

/// A legacy table: its catalog columns and its rows.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: TableName,
    columns: Vec<String>,
    rows: Vec<SourceRow>,
}

impl MemoryTable {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: TableName::parse(name).unwrap(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row, values in column order.
    pub fn row(mut self, values: Vec<SqlValue>) -> Self {
        assert_eq!(values.len(), self.columns.len(), "row width");
        self.rows
            .push(self.columns.iter().cloned().zip(values).collect());
        self
    }

    fn matches(&self, table: &TableName) -> bool {
        self.name.name.eq_ignore_ascii_case(&table.name)
            && match (&table.schema, &self.name.schema) {
                (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
                (Some(_), None) => false,
                (None, _) => true,
            }
    }

    /// Name resolution of a quoted identifier: case-sensitive.
    fn matches_exactly(&self, table: &TableName) -> bool {
        self.name.name == table.name
            && (table.schema.is_none() || table.schema == self.name.schema)
    }
}

#[derive(Default)]
struct SourceState {
    tables: Vec<MemoryTable>,
    queries: Vec<String>,
    open: usize,
    connects: usize,
    fail_queries: bool,
    fail_connect: bool,
}

/// In-memory legacy store.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: MemoryTable) -> Self {
        lock(&self.state).tables.push(table);
        self
    }

    /// Every query fails with a source error.
    pub fn failing_queries(self) -> Self {
        lock(&self.state).fail_queries = true;
        self
    }

    /// Connecting fails with a source error.
    pub fn failing_connect(self) -> Self {
        lock(&self.state).fail_connect = true;
        self
    }

    /// SELECTs issued so far.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state).queries.clone()
    }

    /// Connections opened and not yet closed or dropped.
    pub fn open_connections(&self) -> usize {
        lock(&self.state).open
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>> {
        let mut state = lock(&self.state);
        if state.fail_connect {
            return Err(MigrateError::source_db("connection refused"));
        }
        state.open += 1;
        state.connects += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            dialect: PostgresDialect::new(),
        }))
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

struct MemoryConnection {
    state: Arc<Mutex<SourceState>>,
    dialect: PostgresDialect,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open = state.open.saturating_sub(1);
    }
}

#[async_trait]
impl SourceConnection for MemoryConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_columns(&mut self, table: &TableName) -> Result<Option<SourceTable>> {
        let state = lock(&self.state);
        Ok(state
            .tables
            .iter()
            .find(|t| t.matches(table))
            .map(|t| SourceTable {
                table: t.name.clone(),
                columns: t.columns.clone(),
            }))
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<SourceRow>> {
        let mut state = lock(&self.state);
        state.queries.push(sql.to_string());
        if state.fail_queries {
            return Err(MigrateError::source_db("syntax error at or near \"FROM\""));
        }

        let parsed = ParsedSelect::parse(sql)?;
        let table = state
            .tables
            .iter()
            .find(|t| t.matches_exactly(&parsed.table))
            .ok_or_else(|| MigrateError::source_db(format!("relation {} does not exist", parsed.table)))?;

        let rows = table
            .rows
            .iter()
            .take(parsed.limit.unwrap_or(usize::MAX))
            .map(|row| {
                parsed
                    .columns
                    .iter()
                    .map(|c| (c.clone(), row.value(c).clone()))
                    .collect()
            })
            .collect();
        Ok(rows)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct ParsedSelect {
    columns: Vec<String>,
    table: TableName,
    limit: Option<usize>,
}

impl ParsedSelect {
    fn parse(sql: &str) -> Result<Self> {
        let bad = || MigrateError::source_db(format!("unsupported query: {}", sql));
        let rest = sql.strip_prefix("SELECT ").ok_or_else(bad)?;
        let (columns, rest) = rest.split_once(" FROM ").ok_or_else(bad)?;
        let table_end = [" WHERE ", " ORDER BY ", " LIMIT "]
            .iter()
            .filter_map(|kw| rest.find(kw))
            .min()
            .unwrap_or(rest.len());
        let table = TableName::parse(&rest[..table_end].replace('"', ""))?;
        let limit = rest
            .rsplit_once(" LIMIT ")
            .and_then(|(_, n)| n.trim().parse().ok());

        Ok(Self {
            columns: columns
                .split(", ")
                .map(|c| c.trim_matches('"').to_string())
                .collect(),
            table,
            limit,
        })
    }
}

// ===== target =====

#[derive(Debug, Default)]
struct TargetTable {
    id_column: String,
    rows: HashMap<PkValue, HashMap<String, SqlValue>>,
}

#[derive(Default)]
struct TargetState {
    tables: HashMap<String, TargetTable>,
    fail_writes: HashSet<PkValue>,
    fail_backfill: HashSet<PkValue>,
    fail_sync: bool,
    probes: usize,
    raw_inserts: usize,
    merges: usize,
    update_batches: usize,
    syncs: Vec<String>,
}

/// In-memory target store.
#[derive(Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

fn store_error(message: impl ToString) -> MigrateError {
    MigrateError::pool(message, "in-memory target")
}

fn pk_of(value: &SqlValue) -> Result<PkValue> {
    PkValue::from_value(value).ok_or_else(|| store_error(format!("invalid id {}", value)))
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the given id column.
    pub fn with_table(self, table: &str, id_column: &str) -> Self {
        lock(&self.state).tables.insert(
            table.to_lowercase(),
            TargetTable {
                id_column: id_column.to_string(),
                rows: HashMap::new(),
            },
        );
        self
    }

    /// Preload a row.
    pub fn with_row(self, table: &str, id: impl Into<PkValue>, values: &[(&str, SqlValue)]) -> Self {
        {
            let mut state = lock(&self.state);
            let t = state.tables.get_mut(&table.to_lowercase()).expect("table registered");
            t.rows.insert(
                id.into(),
                values
                    .iter()
                    .map(|(c, v)| (c.to_lowercase(), v.clone()))
                    .collect(),
            );
        }
        self
    }

    /// Inserts and merges of this id fail.
    pub fn fail_write(self, id: impl Into<PkValue>) -> Self {
        lock(&self.state).fail_writes.insert(id.into());
        self
    }

    /// A reference update for this id violates a constraint.
    pub fn fail_backfill(self, id: impl Into<PkValue>) -> Self {
        lock(&self.state).fail_backfill.insert(id.into());
        self
    }

    pub fn failing_sync(self) -> Self {
        lock(&self.state).fail_sync = true;
        self
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.state)
            .tables
            .get(&table.to_lowercase())
            .map_or(0, |t| t.rows.len())
    }

    pub fn contains(&self, table: &str, id: impl Into<PkValue>) -> bool {
        lock(&self.state)
            .tables
            .get(&table.to_lowercase())
            .is_some_and(|t| t.rows.contains_key(&id.into()))
    }

    /// Stored value of a column; `None` when the row or column is absent.
    pub fn value(&self, table: &str, id: impl Into<PkValue>, column: &str) -> Option<SqlValue> {
        lock(&self.state)
            .tables
            .get(&table.to_lowercase())
            .and_then(|t| t.rows.get(&id.into()))
            .and_then(|row| row.get(&column.to_lowercase()).cloned())
    }

    pub fn ids(&self, table: &str) -> HashSet<PkValue> {
        lock(&self.state)
            .tables
            .get(&table.to_lowercase())
            .map(|t| t.rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn probes(&self) -> usize {
        lock(&self.state).probes
    }

    pub fn raw_inserts(&self) -> usize {
        lock(&self.state).raw_inserts
    }

    pub fn merges(&self) -> usize {
        lock(&self.state).merges
    }

    pub fn update_batches(&self) -> usize {
        lock(&self.state).update_batches
    }

    pub fn syncs(&self) -> Vec<String> {
        lock(&self.state).syncs.clone()
    }
}

fn row_values(row: &[ColumnValue]) -> HashMap<String, SqlValue> {
    row.iter()
        .map(|c| (c.column.to_lowercase(), c.value.clone()))
        .collect()
}

fn table_mut<'a>(state: &'a mut TargetState, table: &TableName) -> Result<&'a mut TargetTable> {
    state
        .tables
        .get_mut(&table_key(table))
        .ok_or_else(|| store_error(format!("relation {} does not exist", table)))
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn exists(&self, table: &TableName, _id_column: &str, id: &SqlValue) -> Result<bool> {
        let mut state = lock(&self.state);
        state.probes += 1;
        let pk = pk_of(id)?;
        Ok(table_mut(&mut state, table)?.rows.contains_key(&pk))
    }

    async fn merge(&self, table: &TableName, id_column: &str, row: &[ColumnValue]) -> Result<()> {
        let mut state = lock(&self.state);
        state.merges += 1;
        let values = row_values(row);
        let pk = pk_of(values.get(&id_column.to_lowercase()).unwrap_or(&SqlValue::NULL))?;
        if state.fail_writes.contains(&pk) {
            return Err(store_error(format!("merge of {} rejected", pk)));
        }
        table_mut(&mut state, table)?
            .rows
            .entry(pk)
            .or_default()
            .extend(values);
        Ok(())
    }

    async fn update_references(
        &self,
        table: &TableName,
        column: &str,
        _id_column: &str,
        updates: &[ReferenceUpdate],
    ) -> Result<u64> {
        let mut state = lock(&self.state);
        state.update_batches += 1;

        let mut pairs = Vec::with_capacity(updates.len());
        for u in updates {
            let id = pk_of(&u.id)?;
            let parent = pk_of(&u.reference)?;
            if state.fail_backfill.contains(&id) {
                return Err(store_error(format!("update of {} violates a constraint", id)));
            }
            pairs.push((id, parent, u.reference.clone()));
        }

        // All or nothing, like the batch transaction.
        let t = table_mut(&mut state, table)?;
        if let Some((_, parent, _)) = pairs.iter().find(|(_, p, _)| !t.rows.contains_key(p)) {
            return Err(store_error(format!(
                "foreign key violation: {} is not present in {}",
                parent, table
            )));
        }

        let mut updated = 0;
        for (id, _, reference) in pairs {
            if let Some(row) = t.rows.get_mut(&id) {
                row.insert(column.to_lowercase(), reference);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn sync_identity(&self, table: &TableName, _id_column: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.syncs.push(table.to_string());
        if state.fail_sync {
            return Err(store_error("permission denied for sequence"));
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl RawWriter for MemoryTarget {
    async fn insert_raw(&self, table: &TableName, row: &[ColumnValue]) -> Result<()> {
        let mut state = lock(&self.state);
        state.raw_inserts += 1;
        let values = row_values(row);
        let id_column = table_mut(&mut state, table)?.id_column.to_lowercase();
        let pk = pk_of(values.get(&id_column).unwrap_or(&SqlValue::NULL))?;
        if state.fail_writes.contains(&pk) {
            return Err(store_error(format!("insert of {} rejected", pk)));
        }
        let t = table_mut(&mut state, table)?;
        if t.rows.contains_key(&pk) {
            return Err(store_error(format!(
                "duplicate key value violates unique constraint: {}",
                pk
            )));
        }
        t.rows.insert(pk, values);
        Ok(())
    }
}

// ===== fixtures =====

/// `Owner` (assigned text ids), `Category` (store-generated ids, a
/// self-reference and a reference to `Owner`) and `Region` (assigned text
/// ids with a self-reference), all in schema `app`.
pub fn registry() -> TypeRegistry {
    TypeRegistry::from_types([
        RecordType::new("Owner", "owner")
            .field(FieldDef::scalar("code", FieldType::Text).id())
            .field(FieldDef::scalar("name", FieldType::Text)),
        RecordType::new("Category", "category")
            .field(FieldDef::scalar("id", FieldType::Int64).id().generated())
            .field(FieldDef::scalar("name", FieldType::Text))
            .field(FieldDef::reference("parent", "Category").column("parent_id"))
            .field(FieldDef::reference("owner", "Owner").column("owner_code"))
            .field(FieldDef::scalar("active", FieldType::Bool)),
        RecordType::new("Region", "region")
            .field(FieldDef::scalar("code", FieldType::Text).id())
            .field(FieldDef::scalar("name", FieldType::Text))
            .field(FieldDef::reference("parent", "Region").column("parent_code")),
    ])
    .unwrap()
}

/// Target tables for [`registry`].
pub fn target() -> MemoryTarget {
    MemoryTarget::new()
        .with_table("app.owner", "code")
        .with_table("app.category", "id")
        .with_table("app.region", "code")
}

pub const CATEGORY_COLUMNS: &[&str] = &["CAT_ID", "CAT_NAME", "PARENT_ID", "OWNER_CODE", "ACTIVE"];

/// A legacy category row.
pub fn category_row(id: SqlValue, name: &str, parent: SqlValue) -> Vec<SqlValue> {
    vec![id, name.into(), parent, SqlValue::NULL, SqlValue::Text("Y".into())]
}

/// The self-referencing category migration.
pub fn category_migration() -> TableMigration {
    TableMigration::builder("dbo.T_CATEGORY", "Category")
        .id("CAT_ID", "id")
        .column("CAT_NAME", "name")
        .column("PARENT_ID", "parent")
        .column("OWNER_CODE", "owner")
        .self_reference("parent")
        .build()
        .unwrap()
}

pub const REGION_COLUMNS: &[&str] = &["REG_CODE", "REG_NAME", "PARENT_CODE"];

/// A legacy region row; codes are zero-padded text.
pub fn region_row(code: &str, name: &str, parent: Option<&str>) -> Vec<SqlValue> {
    vec![code.into(), name.into(), parent.map_or(SqlValue::NULL, SqlValue::from)]
}

/// The self-referencing region migration.
pub fn region_migration() -> TableMigration {
    TableMigration::builder("dbo.T_REGION", "Region")
        .id("REG_CODE", "code")
        .column("REG_NAME", "name")
        .column("PARENT_CODE", "parent")
        .self_reference("parent")
        .build()
        .unwrap()
}
