//! PostgreSQL SQL dialect (Strategy pattern).

use crate::core::identifier::quote_pg;
use crate::core::traits::{Dialect, LimitSyntax};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_pg(name)
    }

    fn limit_syntax(&self) -> LimitSyntax {
        LimitSyntax::Limit
    }
}
