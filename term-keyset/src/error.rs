//! Error types for key tracking.
//!
//! All fallible operations in this crate return [`KeysetError`]. Storage and I/O
//! failures are fatal for the run that hit them: the tracker never retries them and
//! never drops a key to keep going, because a lost key turns into a missed duplicate.

use thiserror::Error;

/// The error type for key tracking operations.
#[derive(Error, Debug)]
pub enum KeysetError {
    /// Invalid construction parameters, reported before any key is processed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure inside the overflow store (disk full, permission revoked, corrupt file).
    #[error("Storage error during {operation}: {source}")]
    Storage {
        /// What the store was doing when it failed
        operation: String,
        /// The underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },

    /// Error from filesystem operations outside the store itself.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A key that cannot be canonicalized.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A key column is missing from a record batch.
    #[error("Column '{column}' not found in record batch")]
    ColumnNotFound { column: String },

    /// The tracker was used after `close`.
    #[error("Key tracker is closed")]
    Closed,
}

/// A type alias for `Result<T, KeysetError>`.
pub type Result<T> = std::result::Result<T, KeysetError>;

impl KeysetError {
    /// Creates a storage error for the named operation.
    pub fn storage(operation: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Storage {
            operation: operation.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Returns true for errors caused by the storage medium.
    ///
    /// Callers should fail the enclosing validation rule on these rather than skip rows.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KeysetError::Storage { .. } | KeysetError::Io(_))
    }

    /// Returns true if this error was raised while validating construction parameters.
    pub fn is_configuration(&self) -> bool {
        matches!(self, KeysetError::Configuration(_))
    }
}
