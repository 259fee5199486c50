//! Error types for the SQLite record store.

use thiserror::Error;

/// Errors that can occur in the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value is not valid JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database directory could not be created.
    #[error("Failed to create directory '{path}': {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for simplesess_session::Error {
    fn from(e: StoreError) -> Self {
        simplesess_session::Error::Store(e.to_string())
    }
}
