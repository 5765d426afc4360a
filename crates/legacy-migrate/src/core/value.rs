//! SQL value types shared by the source drivers, the processors and the target store.
//!
//! Rows are fully materialized before they are migrated, so values are owned.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type hint for NULL values.
///
/// The target store binds parameters with explicit casts, so a NULL still
/// needs to know which SQL type it stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F64,
    Decimal,
    String,
    Bytes,
    Uuid,
    Date,
    Time,
    Timestamp,
}

/// A loosely typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with type hint.
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without timezone. Every temporal value read from a legacy
    /// store is normalized to this variant.
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// An untyped NULL, used where no better hint is known.
    pub const NULL: SqlValue = SqlValue::Null(SqlNullType::String);

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value (for type-aware NULL encoding).
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I16(_) => SqlNullType::I16,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Time(_) => SqlNullType::Time,
            SqlValue::Timestamp(_) => SqlNullType::Timestamp,
        }
    }

    /// Numeric zero in any representation, including the text `"0"`.
    ///
    /// Legacy schemas use `0` in foreign-key columns to mean "no reference".
    #[must_use]
    pub fn is_numeric_zero(&self) -> bool {
        match self {
            SqlValue::I16(v) => *v == 0,
            SqlValue::I32(v) => *v == 0,
            SqlValue::I64(v) => *v == 0,
            SqlValue::F64(v) => *v == 0.0,
            SqlValue::Decimal(v) => v.is_zero(),
            SqlValue::Text(s) => s.trim() == "0",
            _ => false,
        }
    }

    /// Normalize temporal values to a single representation.
    ///
    /// Dates become midnight timestamps and times are placed on 1970-01-01.
    #[must_use]
    pub fn normalize_temporal(self) -> SqlValue {
        match self {
            SqlValue::Date(d) => SqlValue::Timestamp(d.and_time(NaiveTime::default())),
            SqlValue::Time(t) => SqlValue::Timestamp(NaiveDateTime::new(epoch_date(), t)),
            SqlValue::Null(SqlNullType::Date | SqlNullType::Time) => {
                SqlValue::Null(SqlNullType::Timestamp)
            }
            other => other,
        }
    }
}

/// 1970-01-01, the date times-of-day are anchored to.
pub(crate) fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null(_) => f.write_str("NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::I16(v) => write!(f, "{}", v),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Bytes(v) => {
                f.write_str("\\x")?;
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            SqlValue::Uuid(v) => write!(f, "{}", v),
            SqlValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            SqlValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            SqlValue::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::NULL)
    }
}

/// A primary key value.
///
/// Identity fields are restricted to integer, uuid and text types, which
/// makes ids hashable for the run context's bookkeeping sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PkValue {
    /// Integer primary key (covers smallint, int and bigint).
    Int(i64),
    /// UUID/GUID primary key.
    Uuid(Uuid),
    /// String primary key.
    String(String),
}

impl PkValue {
    /// Extract a primary key from a value already coerced to the id field's type.
    ///
    /// Returns `None` for NULL and for types that cannot act as an identity.
    pub fn from_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::I16(v) => Some(PkValue::Int(i64::from(*v))),
            SqlValue::I32(v) => Some(PkValue::Int(i64::from(*v))),
            SqlValue::I64(v) => Some(PkValue::Int(*v)),
            SqlValue::Uuid(v) => Some(PkValue::Uuid(*v)),
            SqlValue::Text(v) => Some(PkValue::String(v.clone())),
            _ => None,
        }
    }

    /// Every key an unconverted source value may stand for.
    ///
    /// Legacy reference columns are often typed differently from the ids
    /// they point at, so a value is read as each identity type it fits:
    /// an integral number is also its decimal text, and text that parses as
    /// an integer or uuid is also that key. Text is never rewritten, so
    /// `"007"` and `"7"` stay distinct text keys. Callers look up each key
    /// in turn; a set only matches through the key type it actually holds.
    pub fn lookup_keys(value: &SqlValue) -> Vec<Self> {
        let integral = match value {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::F64(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(*v as i64),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        };
        if let Some(v) = integral {
            return vec![PkValue::Int(v), PkValue::String(v.to_string())];
        }

        match value {
            SqlValue::Text(s) => {
                let trimmed = s.trim();
                let mut keys = vec![PkValue::String(s.clone())];
                if trimmed.len() != s.len() {
                    keys.push(PkValue::String(trimmed.to_string()));
                }
                if let Ok(v) = trimmed.parse::<i64>() {
                    keys.push(PkValue::Int(v));
                } else if let Ok(u) = Uuid::parse_str(trimmed) {
                    keys.push(PkValue::Uuid(u));
                }
                keys
            }
            SqlValue::Uuid(u) => vec![PkValue::Uuid(*u), PkValue::String(u.to_string())],
            other => PkValue::from_value(other).into_iter().collect(),
        }
    }
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkValue::Int(v) => write!(f, "{}", v),
            PkValue::Uuid(v) => write!(f, "{}", v),
            PkValue::String(v) => f.write_str(v),
        }
    }
}

impl From<&PkValue> for SqlValue {
    fn from(id: &PkValue) -> Self {
        match id {
            PkValue::Int(v) => SqlValue::I64(*v),
            PkValue::Uuid(v) => SqlValue::Uuid(*v),
            PkValue::String(v) => SqlValue::Text(v.clone()),
        }
    }
}

impl From<i32> for PkValue {
    fn from(v: i32) -> Self {
        PkValue::Int(i64::from(v))
    }
}

impl From<i64> for PkValue {
    fn from(v: i64) -> Self {
        PkValue::Int(v)
    }
}

impl From<&str> for PkValue {
    fn from(v: &str) -> Self {
        PkValue::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null(SqlNullType::String).is_null());
        assert!(SqlValue::NULL.is_null());
        assert!(!SqlValue::I32(42).is_null());
    }

    #[test]
    fn test_numeric_zero() {
        assert!(SqlValue::I32(0).is_numeric_zero());
        assert!(SqlValue::I64(0).is_numeric_zero());
        assert!(SqlValue::Decimal(Decimal::ZERO).is_numeric_zero());
        assert!(SqlValue::Text(" 0 ".into()).is_numeric_zero());
        assert!(!SqlValue::I32(7).is_numeric_zero());
        assert!(!SqlValue::NULL.is_numeric_zero());
        assert!(!SqlValue::Bool(false).is_numeric_zero());
    }

    #[test]
    fn test_normalize_temporal() {
        let d = NaiveDate::from_ymd_opt(2019, 3, 14).unwrap();
        assert_eq!(
            SqlValue::Date(d).normalize_temporal(),
            SqlValue::Timestamp(d.and_hms_opt(0, 0, 0).unwrap())
        );

        let t = NaiveTime::from_hms_opt(13, 45, 0).unwrap();
        assert_eq!(
            SqlValue::Time(t).normalize_temporal(),
            SqlValue::Timestamp(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_time(t))
        );

        assert_eq!(SqlValue::I32(1).normalize_temporal(), SqlValue::I32(1));
    }

    #[test]
    fn test_pk_value_from_value() {
        assert_eq!(PkValue::from_value(&SqlValue::I32(5)), Some(PkValue::Int(5)));
        assert_eq!(
            PkValue::from_value(&SqlValue::Text("A-1".into())),
            Some(PkValue::String("A-1".into()))
        );
        assert_eq!(PkValue::from_value(&SqlValue::NULL), None);
        assert_eq!(PkValue::from_value(&SqlValue::F64(1.0)), None);
    }

    #[test]
    fn test_pk_value_lookup_keys() {
        assert_eq!(
            PkValue::lookup_keys(&SqlValue::I32(7)),
            vec![PkValue::Int(7), PkValue::String("7".into())]
        );
        assert_eq!(
            PkValue::lookup_keys(&SqlValue::Decimal(Decimal::new(900, 2))),
            vec![PkValue::Int(9), PkValue::String("9".into())]
        );
        assert_eq!(
            PkValue::lookup_keys(&SqlValue::Text(" 42 ".into())),
            vec![
                PkValue::String(" 42 ".into()),
                PkValue::String("42".into()),
                PkValue::Int(42)
            ]
        );
        assert_eq!(
            PkValue::lookup_keys(&SqlValue::Text("007".into())),
            vec![PkValue::String("007".into()), PkValue::Int(7)]
        );
        assert_eq!(
            PkValue::lookup_keys(&SqlValue::Text("K-7".into())),
            vec![PkValue::String("K-7".into())]
        );
        assert!(PkValue::lookup_keys(&SqlValue::F64(7.5)).is_empty());
        assert!(PkValue::lookup_keys(&SqlValue::NULL).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(SqlValue::NULL.to_string(), "NULL");
        assert_eq!(PkValue::Int(12).to_string(), "12");
    }
}
