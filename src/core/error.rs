/// Sqlmate Error Module
///
/// This module defines the error taxonomy shared by every layer of the crate.
/// Schema problems, coercion problems and execution failures each get their
/// own variant so callers can tell "the catalog lookup failed" apart from
/// "the statement failed" without parsing messages.
use thiserror::Error;

/// Comprehensive error type for sqlmate.
///
/// The variants fall into four groups:
/// - Engine errors bubbled up from SQLite (`Database`, `Timeout`, `Query`)
/// - Schema errors (`SchemaQuery`, `NoSuchTable`, `MissingColumn`, `UnknownColumn`)
/// - Coercion errors (`UnknownType`, `Conversion`)
/// - Caller errors (`InvalidCondition`, `Config`, `EventHandler`)
#[derive(Error, Debug)]
pub enum SqlmateError {
    /// Errors reported by SQLite itself
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Statement-level failures that are not a raw SQLite error
    #[error("Query error: {0}")]
    Query(String),

    /// The execution deadline elapsed before the statement finished
    #[error("Query timed out after {seconds:.3}s")]
    Timeout { seconds: f64 },

    /// The catalog lookup for a table failed or returned no columns
    #[error("catalog query failed or returned no columns for '{database}'.'{table}'")]
    SchemaQuery {
        database: String,
        table: String,
        #[source]
        source: Option<Box<SqlmateError>>,
    },

    /// Reflection found no table with this name
    #[error("table '{database}'.'{table}' does not exist")]
    NoSuchTable { database: String, table: String },

    /// A write payload references a column the resolved schema does not have
    #[error(
        "table schema empty or missing column '{column}'; schema query may have failed or table does not exist"
    )]
    MissingColumn { column: String },

    /// A filter, projection or ordering names a column the table lacks
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    /// A condition is neither a mapping shape nor a predicate
    #[error("Invalid condition format: {0}")]
    InvalidCondition(String),

    /// A declared column type has no coercion descriptor
    #[error("no coercion descriptor for column type '{0}'")]
    UnknownType(String),

    /// A value cannot be converted to its column's type
    #[error("cannot convert value for column '{column}': {message}")]
    Conversion { column: String, message: String },

    /// An event handler failed and the client propagates handler errors
    #[error("event handler '{event}' failed: {message}")]
    EventHandler { event: &'static str, message: String },

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing and serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A worker task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SqlmateError {
    pub(crate) fn conversion(column: &str, message: impl Into<String>) -> Self {
        SqlmateError::Conversion {
            column: column.to_string(),
            message: message.into(),
        }
    }

    /// Returns the underlying SQLite error, if this error wraps one.
    pub fn as_sqlite(&self) -> Option<&rusqlite::Error> {
        match self {
            SqlmateError::Database(e) => Some(e),
            SqlmateError::SchemaQuery {
                source: Some(inner),
                ..
            } => inner.as_sqlite(),
            _ => None,
        }
    }

    /// Renders the error followed by its `source()` chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }
}

impl From<toml::de::Error> for SqlmateError {
    fn from(e: toml::de::Error) -> Self {
        SqlmateError::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SqlmateError {
    fn from(e: tokio::task::JoinError) -> Self {
        SqlmateError::Internal(e.to_string())
    }
}

/// Type alias for Result with `SqlmateError` as the error type.
pub type Result<T> = std::result::Result<T, SqlmateError>;
