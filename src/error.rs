//! Error types for sqlq.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for sqlq operations.
#[derive(Debug, Error)]
pub enum SqlqError {
    /// No template file exists for the query name.
    #[error("Template not found: '{name}' (looked for {})", path.display())]
    TemplateNotFound { name: String, path: PathBuf },

    /// A bound placeholder survived rendering because no parameter supplied it.
    #[error("Unresolved placeholders in '{name}': {}", placeholders.join(", "))]
    SubstitutionIncomplete {
        name: String,
        placeholders: Vec<String>,
    },

    /// The driver reported a failure while running a statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Connection or pool error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Commit or rollback without an open transaction.
    #[error("Transaction error: {0}")]
    TransactionState(String),

    /// Cache management command that is not recognized.
    #[error("Unknown cache operation: '{0}'. Expected: clear, keys, or stats")]
    UnknownCacheOperation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqlqError {
    /// Create a template-not-found error.
    pub fn not_found(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::TemplateNotFound {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Create a transaction state error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::TransactionState(message.into())
    }
}

impl From<sqlx::Error> for SqlqError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
                Self::Connection(e.to_string())
            }
            sqlx::Error::Io(io) => Self::Connection(io.to_string()),
            other => Self::Execution(other.to_string()),
        }
    }
}

/// Result type alias for sqlq operations.
pub type SqlqResult<T> = Result<T, SqlqError>;
