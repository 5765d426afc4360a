//! Generic value coercion from loosely typed source values to target field types.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::record::FieldType;
use super::value::{epoch_date, SqlValue};

/// A single value could not be converted.
///
/// Conversion failures are recovered by the caller: a failed id fails the
/// row, a failed field is left unset.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert {value} to {target:?}: {reason}")]
pub struct ConversionError {
    pub value: String,
    pub target: FieldType,
    pub reason: String,
}

impl ConversionError {
    pub fn new(value: &SqlValue, target: FieldType, reason: impl Into<String>) -> Self {
        Self {
            value: truncate_for_log(&value.to_string()),
            target,
            reason: reason.into(),
        }
    }
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 64;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Convert `value` to `target`.
///
/// NULL converts to a typed NULL of any type.
pub fn coerce(value: &SqlValue, target: FieldType) -> Result<SqlValue, ConversionError> {
    if value.is_null() {
        return Ok(target.null());
    }

    match target {
        FieldType::Bool => to_bool(value).map(SqlValue::Bool),
        FieldType::Int16 => {
            let v = to_i64(value, target)?;
            i16::try_from(v)
                .map(SqlValue::I16)
                .map_err(|_| ConversionError::new(value, target, "out of range"))
        }
        FieldType::Int32 => {
            let v = to_i64(value, target)?;
            i32::try_from(v)
                .map(SqlValue::I32)
                .map_err(|_| ConversionError::new(value, target, "out of range"))
        }
        FieldType::Int64 => to_i64(value, target).map(SqlValue::I64),
        FieldType::Float64 => to_f64(value).map(SqlValue::F64),
        FieldType::Decimal => to_decimal(value).map(SqlValue::Decimal),
        FieldType::Text => Ok(match value {
            SqlValue::Text(s) => SqlValue::Text(s.clone()),
            SqlValue::Bytes(b) => SqlValue::Text(
                String::from_utf8(b.clone())
                    .map_err(|_| ConversionError::new(value, target, "bytes are not UTF-8"))?,
            ),
            other => SqlValue::Text(other.to_string()),
        }),
        FieldType::Uuid => to_uuid(value).map(SqlValue::Uuid),
        FieldType::Date => to_timestamp(value, target).map(|ts| SqlValue::Date(ts.date())),
        FieldType::Time => match value {
            SqlValue::Text(s) => parse_time(s.trim())
                .map(SqlValue::Time)
                .ok_or_else(|| ConversionError::new(value, target, "not a time of day")),
            _ => to_timestamp(value, target).map(|ts| SqlValue::Time(ts.time())),
        },
        FieldType::Timestamp => to_timestamp(value, target).map(SqlValue::Timestamp),
        FieldType::Bytes => match value {
            SqlValue::Bytes(b) => Ok(SqlValue::Bytes(b.clone())),
            SqlValue::Text(s) => Ok(SqlValue::Bytes(s.as_bytes().to_vec())),
            SqlValue::Uuid(u) => Ok(SqlValue::Bytes(u.as_bytes().to_vec())),
            _ => Err(ConversionError::new(value, target, "not binary")),
        },
    }
}

fn to_bool(value: &SqlValue) -> Result<bool, ConversionError> {
    let err = || ConversionError::new(value, FieldType::Bool, "not a boolean");
    match value {
        SqlValue::Bool(b) => Ok(*b),
        SqlValue::I16(v) => Ok(*v != 0),
        SqlValue::I32(v) => Ok(*v != 0),
        SqlValue::I64(v) => Ok(*v != 0),
        SqlValue::Decimal(v) => Ok(!v.is_zero()),
        SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" => Ok(false),
            _ => Err(err()),
        },
        _ => Err(err()),
    }
}

fn to_i64(value: &SqlValue, target: FieldType) -> Result<i64, ConversionError> {
    match value {
        SqlValue::Bool(b) => Ok(i64::from(*b)),
        SqlValue::I16(v) => Ok(i64::from(*v)),
        SqlValue::I32(v) => Ok(i64::from(*v)),
        SqlValue::I64(v) => Ok(*v),
        SqlValue::F64(v) => {
            if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                Ok(*v as i64)
            } else {
                Err(ConversionError::new(value, target, "not an integral number"))
            }
        }
        SqlValue::Decimal(d) => {
            if d.fract().is_zero() {
                d.to_i64()
                    .ok_or_else(|| ConversionError::new(value, target, "out of range"))
            } else {
                Err(ConversionError::new(value, target, "not an integral number"))
            }
        }
        SqlValue::Text(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(v);
            }
            // Legacy exports often render integers as "12.0"
            match s.parse::<Decimal>() {
                Ok(d) if d.fract().is_zero() => d
                    .to_i64()
                    .ok_or_else(|| ConversionError::new(value, target, "out of range")),
                _ => Err(ConversionError::new(value, target, "not an integer")),
            }
        }
        _ => Err(ConversionError::new(value, target, "not numeric")),
    }
}

fn to_f64(value: &SqlValue) -> Result<f64, ConversionError> {
    let target = FieldType::Float64;
    match value {
        SqlValue::I16(v) => Ok(f64::from(*v)),
        SqlValue::I32(v) => Ok(f64::from(*v)),
        SqlValue::I64(v) => Ok(*v as f64),
        SqlValue::F64(v) => Ok(*v),
        SqlValue::Decimal(d) => d
            .to_f64()
            .ok_or_else(|| ConversionError::new(value, target, "out of range")),
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ConversionError::new(value, target, "not a number")),
        _ => Err(ConversionError::new(value, target, "not numeric")),
    }
}

fn to_decimal(value: &SqlValue) -> Result<Decimal, ConversionError> {
    let target = FieldType::Decimal;
    match value {
        SqlValue::I16(v) => Ok(Decimal::from(*v)),
        SqlValue::I32(v) => Ok(Decimal::from(*v)),
        SqlValue::I64(v) => Ok(Decimal::from(*v)),
        SqlValue::F64(v) => Decimal::try_from(*v)
            .map_err(|_| ConversionError::new(value, target, "not representable")),
        SqlValue::Decimal(d) => Ok(*d),
        SqlValue::Text(s) => s
            .trim()
            .parse::<Decimal>()
            .map_err(|_| ConversionError::new(value, target, "not a decimal")),
        _ => Err(ConversionError::new(value, target, "not numeric")),
    }
}

fn to_uuid(value: &SqlValue) -> Result<Uuid, ConversionError> {
    let target = FieldType::Uuid;
    match value {
        SqlValue::Uuid(u) => Ok(*u),
        SqlValue::Text(s) => Uuid::parse_str(s.trim())
            .map_err(|_| ConversionError::new(value, target, "not a UUID")),
        SqlValue::Bytes(b) => Uuid::from_slice(b)
            .map_err(|_| ConversionError::new(value, target, "expected 16 bytes")),
        _ => Err(ConversionError::new(value, target, "not a UUID")),
    }
}

fn to_timestamp(value: &SqlValue, target: FieldType) -> Result<NaiveDateTime, ConversionError> {
    match value {
        SqlValue::Timestamp(ts) => Ok(*ts),
        SqlValue::Date(d) => Ok(d.and_time(NaiveTime::default())),
        SqlValue::Time(t) => Ok(NaiveDateTime::new(epoch_date(), *t)),
        SqlValue::Text(s) => parse_timestamp(s.trim())
            .ok_or_else(|| ConversionError::new(value, target, "not a date/time")),
        _ => Err(ConversionError::new(value, target, "not temporal")),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::default()))
        })
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_timestamp(s).map(|ts| ts.time()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlNullType;

    #[test]
    fn test_null_becomes_typed_null() {
        assert_eq!(
            coerce(&SqlValue::NULL, FieldType::Int64).unwrap(),
            SqlValue::Null(SqlNullType::I64)
        );
    }

    #[test]
    fn test_integers() {
        assert_eq!(coerce(&SqlValue::I32(5), FieldType::Int64).unwrap(), SqlValue::I64(5));
        assert_eq!(
            coerce(&SqlValue::Text(" 42 ".into()), FieldType::Int32).unwrap(),
            SqlValue::I32(42)
        );
        assert_eq!(
            coerce(&SqlValue::Text("12.0".into()), FieldType::Int64).unwrap(),
            SqlValue::I64(12)
        );
        assert_eq!(
            coerce(&SqlValue::Decimal(Decimal::new(700, 2)), FieldType::Int64).unwrap(),
            SqlValue::I64(7)
        );
        assert!(coerce(&SqlValue::I64(70_000), FieldType::Int16).is_err());
        assert!(coerce(&SqlValue::Text("abc".into()), FieldType::Int64).is_err());
        assert!(coerce(&SqlValue::F64(1.5), FieldType::Int32).is_err());
    }

    #[test]
    fn test_booleans() {
        for (input, expected) in [("Y", true), ("n", false), ("TRUE", true), ("0", false)] {
            assert_eq!(
                coerce(&SqlValue::Text(input.into()), FieldType::Bool).unwrap(),
                SqlValue::Bool(expected)
            );
        }
        assert_eq!(coerce(&SqlValue::I16(1), FieldType::Bool).unwrap(), SqlValue::Bool(true));
        assert!(coerce(&SqlValue::Text("maybe".into()), FieldType::Bool).is_err());
    }

    #[test]
    fn test_temporal() {
        let ts = NaiveDate::from_ymd_opt(2020, 2, 29)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            coerce(&SqlValue::Timestamp(ts), FieldType::Date).unwrap(),
            SqlValue::Date(ts.date())
        );
        assert_eq!(
            coerce(&SqlValue::Timestamp(ts), FieldType::Time).unwrap(),
            SqlValue::Time(ts.time())
        );
        assert_eq!(
            coerce(&SqlValue::Text("2020-02-29T08:30:00".into()), FieldType::Timestamp).unwrap(),
            SqlValue::Timestamp(ts)
        );
        assert_eq!(
            coerce(&SqlValue::Text("2020-02-29".into()), FieldType::Date).unwrap(),
            SqlValue::Date(ts.date())
        );
        assert_eq!(
            coerce(&SqlValue::Text("08:30".into()), FieldType::Time).unwrap(),
            SqlValue::Time(ts.time())
        );
        assert!(coerce(&SqlValue::Text("yesterday".into()), FieldType::Date).is_err());
    }

    #[test]
    fn test_text_and_uuid() {
        assert_eq!(
            coerce(&SqlValue::I64(3), FieldType::Text).unwrap(),
            SqlValue::Text("3".into())
        );
        let id = Uuid::new_v4();
        assert_eq!(
            coerce(&SqlValue::Text(id.to_string()), FieldType::Uuid).unwrap(),
            SqlValue::Uuid(id)
        );
        assert!(coerce(&SqlValue::Text("not-a-uuid".into()), FieldType::Uuid).is_err());
    }

    #[test]
    fn test_error_message_is_truncated() {
        let long = "x".repeat(500);
        let err = coerce(&SqlValue::Text(long), FieldType::Int64).unwrap_err();
        assert!(err.value.len() < 80);
        assert_eq!(err.target, FieldType::Int64);
    }
}
