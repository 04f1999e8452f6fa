//! Sync-engine errors: wraps the transport and core error types so callers
//! only ever match on one enum, and carries the offline/fatal distinction
//! through to the engine's flows (§4.4, §7).

use thiserror::Error;
use tidelog_core::errors::Error as CoreError;
use tidelog_transport::error::{RetryClass, TransportError};

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SyncError {
    /// True when this failure means "the relay is unreachable right now",
    /// per §4.3's offline/fatal split. Only transport errors can be offline;
    /// a local store/crypto failure is always treated as fatal.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Transport(e) if e.retry_class() == RetryClass::Offline)
    }
}
