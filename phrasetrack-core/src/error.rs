//! Error types for phrasetrack-core

use thiserror::Error;

/// Main error type for the phrasetrack-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error (dedup ledger, daily counts)
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A pattern rule failed to compile
    #[error("invalid pattern '{name}': {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// Upload/API error
    #[error("upload error: {0}")]
    Upload(String),

    /// The counting service rejected the shared secret
    #[error("upload rejected: invalid secret")]
    Unauthorized,
}

/// Result type alias for phrasetrack-core
pub type Result<T> = std::result::Result<T, Error>;
