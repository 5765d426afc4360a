//! Run-scoped bookkeeping shared between table migrations.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::core::value::{PkValue, SqlValue};

/// Bookkeeping for one migration run.
///
/// Later tables read what earlier tables recorded, typically to null out a
/// reference to a row that never made it into the target. Everything here is
/// accumulate-only and lives in memory for the duration of the run.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    run_id: Uuid,
    id_sets: HashMap<String, HashSet<PkValue>>,
    id_maps: HashMap<String, HashMap<PkValue, PkValue>>,
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationContext {
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            id_sets: HashMap::new(),
            id_maps: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Add ids to a named set, creating the set on first use.
    ///
    /// Ids are kept exactly as given; they are expected to be the target
    /// ids of migrated rows.
    pub fn record_ids<I>(&mut self, set: &str, ids: I)
    where
        I: IntoIterator<Item = PkValue>,
    {
        self.id_sets.entry(set.to_string()).or_default().extend(ids);
    }

    /// Read a named set.
    pub fn id_set(&self, set: &str) -> Option<&HashSet<PkValue>> {
        self.id_sets.get(set)
    }

    /// Whether a named set holds an id. An unknown set holds nothing.
    pub fn contains_id(&self, set: &str, id: &PkValue) -> bool {
        self.id_sets.get(set).is_some_and(|ids| ids.contains(id))
    }

    /// Whether a named set holds the id an unconverted source value stands for.
    ///
    /// See [`PkValue::lookup_keys`] for how a legacy value is matched.
    pub fn contains_value(&self, set: &str, value: &SqlValue) -> bool {
        PkValue::lookup_keys(value)
            .iter()
            .any(|key| self.contains_id(set, key))
    }

    /// Record `from -> to` in a named map.
    pub fn map_id(&mut self, map: &str, from: PkValue, to: PkValue) {
        self.id_maps
            .entry(map.to_string())
            .or_default()
            .insert(from, to);
    }

    /// Look up `from` in a named map.
    pub fn mapped_id(&self, map: &str, from: &PkValue) -> Option<&PkValue> {
        self.id_maps.get(map).and_then(|m| m.get(from))
    }

    /// Look up the id an unconverted source value stands for in a named map.
    pub fn mapped_value(&self, map: &str, value: &SqlValue) -> Option<&PkValue> {
        PkValue::lookup_keys(value)
            .iter()
            .find_map(|key| self.mapped_id(map, key))
    }

    /// Names of all id sets, sorted.
    pub fn set_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.id_sets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
