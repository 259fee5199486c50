//! Error types for session operations.

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The record store failed. Sessions cannot be guaranteed without
    /// durable storage, so this is always surfaced to the caller.
    #[error("Record store error: {0}")]
    Store(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },

    /// A client-supplied session token could not be parsed.
    #[error("Malformed session token: {0}")]
    MalformedToken(String),

    /// Namespace cannot be used as a cookie name or key segment.
    #[error("Invalid session namespace '{0}'")]
    InvalidNamespace(String),

    /// Expiration settings violate `0 < refresh_variant < expiration`.
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
