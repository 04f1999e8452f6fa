//! Storage-layer errors, converted into the shared `tidelog_core::Error` at
//! the crate boundary so that nothing above this crate needs to know about
//! diesel or r2d2.

use thiserror::Error;
use tidelog_core::errors::{DatabaseError, Error as CoreError};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database is locked")]
    Locked,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("retry budget exhausted after {0} attempts")]
    RetriesExhausted(u32),
}

impl StorageError {
    /// True for the one transient condition the retry loop understands:
    /// the database file being held by another process.
    pub fn is_locked(&self) -> bool {
        match self {
            StorageError::Locked => true,
            StorageError::Diesel(diesel::result::Error::DatabaseError(_, info)) => {
                let msg = info.message();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Diesel(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Locked => CoreError::Database(DatabaseError::Locked),
            StorageError::Diesel(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                ref info,
            )) => CoreError::Database(DatabaseError::UniqueViolation(info.message().to_string())),
            other => CoreError::Database(DatabaseError::Other(other.to_string())),
        }
    }
}
