//! MSSQL SQL dialect (Strategy pattern).

use crate::core::identifier::quote_mssql;
use crate::core::traits::{Dialect, LimitSyntax};

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_mssql(name)
    }

    fn limit_syntax(&self) -> LimitSyntax {
        LimitSyntax::Top
    }
}
