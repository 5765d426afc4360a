//! Target record types.
//!
//! Record types are declared as data (YAML or code) and collected in a
//! [`TypeRegistry`] at startup. The registry plays the role runtime
//! reflection would play elsewhere: it lists the persistable fields of a
//! type, reports their types, and populates [`Record`] instances by name.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::value::{SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};

/// Scalar type of a target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "smallint", alias = "i16")]
    Int16,
    #[serde(alias = "int", alias = "integer", alias = "i32")]
    Int32,
    #[serde(alias = "bigint", alias = "long", alias = "i64")]
    Int64,
    #[serde(alias = "double", alias = "float", alias = "f64")]
    Float64,
    #[serde(alias = "numeric")]
    Decimal,
    #[serde(alias = "string", alias = "varchar")]
    Text,
    Uuid,
    Date,
    Time,
    #[serde(alias = "datetime")]
    Timestamp,
    #[serde(alias = "bytea", alias = "binary")]
    Bytes,
}

impl FieldType {
    /// Type hint used for NULLs of this field type.
    pub fn null_type(self) -> SqlNullType {
        match self {
            FieldType::Bool => SqlNullType::Bool,
            FieldType::Int16 => SqlNullType::I16,
            FieldType::Int32 => SqlNullType::I32,
            FieldType::Int64 => SqlNullType::I64,
            FieldType::Float64 => SqlNullType::F64,
            FieldType::Decimal => SqlNullType::Decimal,
            FieldType::Text => SqlNullType::String,
            FieldType::Uuid => SqlNullType::Uuid,
            FieldType::Date => SqlNullType::Date,
            FieldType::Time => SqlNullType::Time,
            FieldType::Timestamp => SqlNullType::Timestamp,
            FieldType::Bytes => SqlNullType::Bytes,
        }
    }

    /// A typed NULL for this field type.
    pub fn null(self) -> SqlValue {
        SqlValue::Null(self.null_type())
    }

    /// Whether values of this type can act as a record identity.
    pub fn can_be_identity(self) -> bool {
        matches!(
            self,
            FieldType::Int16 | FieldType::Int32 | FieldType::Int64 | FieldType::Uuid | FieldType::Text
        )
    }
}

/// What a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A plain column value.
    Scalar(FieldType),
    /// A reference to another record type, stored as that record's id.
    Reference { target: String },
}

/// One field of a target record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, used by column mappings and transforms.
    pub name: String,

    /// Physical column name. Defaults to the field name.
    #[serde(default)]
    pub column: Option<String>,

    /// Scalar type. Exactly one of `type` and `references` must be set.
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,

    /// Name of the referenced record type, for foreign-key fields.
    #[serde(default)]
    pub references: Option<String>,

    /// This field is the record's identity.
    #[serde(default)]
    pub id: bool,

    /// The identity is normally generated by the store (identity/serial column).
    #[serde(default)]
    pub generated: bool,

    /// Not persisted.
    #[serde(default)]
    pub transient: bool,
}

impl FieldDef {
    /// A scalar field whose column has the same name.
    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            column: None,
            field_type: Some(field_type),
            references: None,
            id: false,
            generated: false,
            transient: false,
        }
    }

    /// A reference to another record type.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: None,
            field_type: None,
            references: Some(target.into()),
            id: false,
            generated: false,
            transient: false,
        }
    }

    /// Set the physical column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Mark this field as the identity.
    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    /// Mark the identity as store-generated.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Exclude this field from persistence.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Physical column name.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Resolve what this field holds.
    pub fn kind(&self) -> Result<FieldKind> {
        match (&self.field_type, &self.references) {
            (Some(t), None) => Ok(FieldKind::Scalar(*t)),
            (None, Some(target)) => Ok(FieldKind::Reference {
                target: target.clone(),
            }),
            (Some(_), Some(_)) => Err(MigrateError::Config(format!(
                "field '{}' declares both a type and a reference",
                self.name
            ))),
            (None, None) => Err(MigrateError::Config(format!(
                "field '{}' needs either a type or a reference",
                self.name
            ))),
        }
    }
}

/// A target record type: the destination structure rows are converted into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    /// Type name, referenced by table descriptors and reference fields.
    pub name: String,

    /// Target schema. Falls back to the target connection's schema.
    #[serde(default)]
    pub schema: Option<String>,

    /// Physical table name.
    pub table: String,

    /// Fields in declaration order.
    pub fields: Vec<FieldDef>,
}

impl RecordType {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the target schema.
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Look up a field by name.
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Registry of all target record types known to a run.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, RecordType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record type. Names must be unique.
    pub fn register(&mut self, record_type: RecordType) -> Result<()> {
        if self.types.contains_key(&record_type.name) {
            return Err(MigrateError::Config(format!(
                "record type '{}' is declared more than once",
                record_type.name
            )));
        }
        self.types.insert(record_type.name.clone(), record_type);
        Ok(())
    }

    /// Build a registry from a list of record types.
    pub fn from_types(types: impl IntoIterator<Item = RecordType>) -> Result<Self> {
        let mut registry = Self::new();
        for t in types {
            registry.register(t)?;
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&RecordType> {
        self.types.get(name)
    }

    /// Look up a record type, failing with a configuration error.
    pub fn require(&self, name: &str) -> Result<&RecordType> {
        self.get(name)
            .ok_or_else(|| MigrateError::Config(format!("unknown record type '{}'", name)))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// An instance of a target record type.
///
/// Unset fields persist as NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    values: BTreeMap<String, SqlValue>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, field: &str) -> Option<&SqlValue> {
        self.values.get(field)
    }

    /// Clear a field so it persists as NULL.
    pub fn unset(&mut self, field: &str) {
        self.values.remove(field);
    }

    pub fn is_set(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub(crate) fn put(&mut self, field: &str, value: SqlValue) {
        self.values.insert(field.to_string(), value);
    }
}

/// Generic field population over a target type.
pub trait FieldMapper {
    /// Fields written to the store, in declaration order.
    fn persistable_fields(&self) -> Vec<&FieldDef>;

    /// Effective scalar type of a field. Reference fields report the type of
    /// the referenced record's id.
    fn field_type(&self, field: &str) -> Result<FieldType>;

    /// Set a field on a record. The value must already have the field's type.
    fn set_field(&self, record: &mut Record, field: &str, value: SqlValue) -> Result<()>;
}

/// A [`FieldMapper`] for one record type, resolving references through the registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryMapper<'a> {
    registry: &'a TypeRegistry,
    record_type: &'a RecordType,
}

impl<'a> RegistryMapper<'a> {
    pub fn new(registry: &'a TypeRegistry, record_type: &'a RecordType) -> Self {
        Self {
            registry,
            record_type,
        }
    }

    pub fn record_type(&self) -> &'a RecordType {
        self.record_type
    }

    /// Create an empty instance of the mapped type.
    pub fn instantiate(&self) -> Record {
        Record::new(&self.record_type.name)
    }

    fn field(&self, name: &str) -> Result<&'a FieldDef> {
        self.record_type.find_field(name).ok_or_else(|| {
            MigrateError::Config(format!(
                "record type '{}' has no field '{}'",
                self.record_type.name, name
            ))
        })
    }
}

/// Id type of a record type, used to type reference fields.
pub(crate) fn id_type_of(registry: &TypeRegistry, record_type: &RecordType) -> Result<FieldType> {
    let id = record_type.fields.iter().find(|f| f.id).ok_or_else(|| {
        MigrateError::Config(format!(
            "record type '{}' has no identity field",
            record_type.name
        ))
    })?;
    match id.kind()? {
        FieldKind::Scalar(t) => Ok(t),
        FieldKind::Reference { target } => {
            if target == record_type.name {
                return Err(MigrateError::Config(format!(
                    "identity of '{}' cannot reference its own type",
                    record_type.name
                )));
            }
            id_type_of(registry, registry.require(&target)?)
        }
    }
}

impl FieldMapper for RegistryMapper<'_> {
    fn persistable_fields(&self) -> Vec<&FieldDef> {
        self.record_type
            .fields
            .iter()
            .filter(|f| !f.transient)
            .collect()
    }

    fn field_type(&self, field: &str) -> Result<FieldType> {
        match self.field(field)?.kind()? {
            FieldKind::Scalar(t) => Ok(t),
            FieldKind::Reference { target } => {
                id_type_of(self.registry, self.registry.require(&target)?)
            }
        }
    }

    fn set_field(&self, record: &mut Record, field: &str, value: SqlValue) -> Result<()> {
        let def = self.field(field)?;
        if record.type_name() != self.record_type.name {
            return Err(MigrateError::Config(format!(
                "cannot set '{}' on a '{}' record",
                field,
                record.type_name()
            )));
        }
        record.put(&def.name, value);
        Ok(())
    }
}
