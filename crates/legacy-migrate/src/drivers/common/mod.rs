//! Utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections
//! - [`url`]: JDBC-style connection URL handling
//! - [`decoded_or_null`]: per-cell decode failures

pub mod tls;
pub mod url;

pub use tls::{SslMode, TlsBuilder};

use std::fmt;

use tracing::warn;

use crate::core::value::{SqlNullType, SqlValue};

/// A decoded cell, or a typed NULL when the driver could not decode it.
///
/// One undecodable value leaves its field unset rather than failing the
/// whole fetch.
pub(crate) fn decoded_or_null<E: fmt::Display>(
    decoded: std::result::Result<SqlValue, E>,
    column: &str,
    null: SqlNullType,
) -> SqlValue {
    match decoded {
        Ok(value) => value,
        Err(e) => {
            warn!("Could not decode column {}: {}; reading it as NULL", column, e);
            SqlValue::Null(null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_value_passes_through() {
        let decoded: std::result::Result<SqlValue, String> = Ok(SqlValue::I32(4));
        assert_eq!(decoded_or_null(decoded, "QTY", SqlNullType::I32), SqlValue::I32(4));
    }

    #[test]
    fn test_decode_failure_reads_as_typed_null() {
        let decoded: std::result::Result<SqlValue, String> =
            Err("cannot convert between the Rust type `String` and the Postgres type `inet`".into());
        assert_eq!(
            decoded_or_null(decoded, "CLIENT_ADDR", SqlNullType::String),
            SqlValue::Null(SqlNullType::String)
        );
    }
}
