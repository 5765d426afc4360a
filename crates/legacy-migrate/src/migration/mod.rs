//! Table migration descriptors, their hooks and the run context.
//!
//! A [`TableMigration`] describes how one legacy table becomes one target
//! record type. Descriptors are built once per run, either in code through
//! [`TableMigration::builder`] or from the `tables` section of the YAML
//! configuration, and are immutable afterwards.
//!
//! Hooks receive a [`MigrationContext`]: filters and mutators read it,
//! post-batch callbacks write to it. This is how an earlier table tells a
//! later one which ids actually made it into the target.

pub mod builtins;
pub mod context;
pub mod descriptor;

pub use context::MigrationContext;
pub use descriptor::{
    AfterBatch, ColumnMapping, RowFilter, RowMutator, TableMigration, TableMigrationBuilder,
    ValueTransform,
};
