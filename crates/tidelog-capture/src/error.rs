//! Capture-pipeline errors: local-I/O and sync failures the presave/save
//! paths can hit. Per §7's propagation policy, hooks render none of this —
//! the CLI layer decides whether a failure here is worth surfacing.

use thiserror::Error;
use tidelog_core::errors::Error as CoreError;
use tidelog_sync::error::SyncError;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}
