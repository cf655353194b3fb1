//! Error types for deskpulse-core

use thiserror::Error;

/// Main error type for the deskpulse-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session log error
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// No usable response from the collector (connect, DNS, TLS, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// Collector answered, but not with a success
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Collector answered with a body we could not make sense of
    #[error("malformed response: {0}")]
    PartialData(String),
}

/// Failures of the append-only session log.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying storage rejected the insert
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The underlying storage could not be queried
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The session is not finalized or its time range is inverted
    #[error("invalid session: {0}")]
    InvalidSession(String),
}

/// Result type alias for deskpulse-core
pub type Result<T> = std::result::Result<T, Error>;
