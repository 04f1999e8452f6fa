pub mod engine;
pub mod error;
pub mod model;
pub mod scheduler;

pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use model::{backoff_seconds, classify_http_status, SyncCycleResult, SyncEngineStatus, SyncRetryClass};
pub use scheduler::{next_sleep_millis, FAST_RETRY_INTERVAL_MS, FOREGROUND_INTERVAL_SECS, INTERVAL_JITTER_SECS};
