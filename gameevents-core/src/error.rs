//! Error types for gameevents-core

use thiserror::Error;

/// Main error type for the gameevents-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level delivery failure (connect, timeout, decode)
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Collection endpoint answered with a non-success status
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Attribution lookup failure
    #[error("attribution error: {0}")]
    Attribution(String),

    /// Advertising identifier could not be resolved
    #[error("identifier error: {0}")]
    Identifier(String),
}

impl Error {
    /// Whether retrying the same request may succeed.
    ///
    /// Server-side failures and transport errors are transient; client errors
    /// (4xx) and local failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { status, .. } => *status >= 500 || *status == 429,
            Error::Delivery(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for gameevents-core
pub type Result<T> = std::result::Result<T, Error>;
