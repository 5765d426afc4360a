//! Core abstractions for configuration-driven legacy migration.
//!
//! - [`value`]: SQL value representation and primary key values
//! - [`record`]: Target record types, the type registry and field population
//! - [`convert`]: Generic value coercion to field types
//! - [`row`]: Materialized legacy rows
//! - [`identifier`]: Identifier validation, quoting and table names
//! - [`traits`]: Source, dialect and target traits
//!
//! # Architecture
//!
//! The core module defines store-agnostic abstractions implemented by the
//! driver modules (`drivers/mssql`, `drivers/postgres`, ...). Processors and
//! the orchestrator depend only on these traits, so they can be exercised
//! against in-memory implementations.

pub mod convert;
pub mod identifier;
pub mod record;
pub mod row;
pub mod traits;
pub mod value;

pub use convert::{coerce, ConversionError};
pub use identifier::TableName;
pub use record::{FieldDef, FieldKind, FieldMapper, FieldType, Record, RecordType, RegistryMapper, TypeRegistry};
pub use row::SourceRow;
pub use traits::{
    ColumnValue, Dialect, LimitSyntax, RawWriter, ReferenceUpdate, SelectQueryOptions,
    SourceConnection, SourceConnector, SourceTable, TargetStore,
};
pub use value::{PkValue, SqlNullType, SqlValue};
