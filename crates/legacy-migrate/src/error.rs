//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
///
/// Everything that reaches a caller as a `MigrateError` is fatal for the
/// table being migrated. Row and field level problems are recovered inside
/// the processors and only show up in logs and summary counters.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing identity field, missing id column, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Legacy database connection or query error
    #[error("Source database error: {0}")]
    Source(String),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A value could not be converted to the field's type
    #[error("Conversion failed for field {field}: {message}")]
    Conversion { field: String, message: String },

    /// A table migration aborted; the run stops here
    #[error("Migration of table {table} aborted: {source}")]
    Table {
        table: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tiberius::error::Error> for MigrateError {
    fn from(e: tiberius::error::Error) -> Self {
        MigrateError::Source(format!("mssql: {}", e))
    }
}

impl From<sqlx::Error> for MigrateError {
    fn from(e: sqlx::Error) -> Self {
        MigrateError::Source(format!("mysql: {}", e))
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Source error from any displayable driver error.
    pub fn source_db(message: impl ToString) -> Self {
        MigrateError::Source(message.to_string())
    }

    /// Wrap a fatal error with the name of the table it aborted.
    pub fn table(table: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Table {
            table: table.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error (or the error it wraps) is a configuration problem.
    pub fn is_config(&self) -> bool {
        match self {
            MigrateError::Config(_) => true,
            MigrateError::Table { source, .. } => source.is_config(),
            _ => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => 1,
            MigrateError::Source(_) => 2,
            MigrateError::Target(_) | MigrateError::Pool { .. } => 3,
            MigrateError::Conversion { .. } | MigrateError::Table { .. } => 4,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
