//! Shared error types for the tidelog core crate.

use thiserror::Error;

/// Result type alias used throughout `tidelog-core` and its dependents.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the local store. Kept separate from [`Error`] so that
/// `tidelog-store` can implement the conversion without this crate knowing
/// about diesel or r2d2.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database is locked")]
    Locked,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Other(String),
}

/// Top-level error type returned by core, store, transport and sync
/// operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
