//! Error types for the ledger crate

use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored JSON could not be read or written
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row holds a value this version cannot interpret
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for declarative::Error {
    fn from(err: Error) -> Self {
        declarative::Error::state(err)
    }
}

impl From<Error> for costguard::Error {
    fn from(err: Error) -> Self {
        costguard::Error::backend(err)
    }
}
