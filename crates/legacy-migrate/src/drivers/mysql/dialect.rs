//! MySQL/MariaDB SQL dialect (Strategy pattern).

use crate::core::identifier::quote_mysql;
use crate::core::traits::{Dialect, LimitSyntax};

/// MySQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_mysql(name)
    }

    fn limit_syntax(&self) -> LimitSyntax {
        LimitSyntax::Limit
    }
}
