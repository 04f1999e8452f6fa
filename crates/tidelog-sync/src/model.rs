//! Sync-engine bookkeeping: the status snapshot exposed to `tidelog
//! status`, and the exponential backoff helper shared by every retryable
//! failure path (SPEC_FULL §C.1, §C.3).

use serde::{Deserialize, Serialize};

const MAX_BACKOFF_EXPONENT: u32 = 8;
const BASE_BACKOFF_SECONDS: i64 = 5;

/// Retry classification shared by every sync-engine flow: distinct from
/// `tidelog_transport::RetryClass` because the engine additionally needs a
/// "reauth required" bucket for relay auth failures, mirroring the split
/// the transport layer makes for HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

pub fn classify_http_status(status: u16) -> SyncRetryClass {
    match status {
        401 | 403 => SyncRetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => SyncRetryClass::Retryable,
        500..=599 => SyncRetryClass::Retryable,
        _ => SyncRetryClass::Permanent,
    }
}

/// Exponential backoff in whole seconds: `2^min(failures, 8) * 5`.
pub fn backoff_seconds(consecutive_failures: i32) -> i64 {
    let exponent = consecutive_failures.max(0).min(MAX_BACKOFF_EXPONENT as i32) as u32;
    (1i64 << exponent) * BASE_BACKOFF_SECONDS
}

/// Bookkeeping exposed via `tidelog status`, operationalizing the "missed
/// uploads" flag and deferred-replay flow into something inspectable
/// (SPEC_FULL §C.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncEngineStatus {
    pub last_push_at: Option<i64>,
    pub last_pull_at: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: i32,
    pub next_retry_at: Option<i64>,
    pub last_cycle_status: String,
    pub last_cycle_duration_ms: i64,
}

/// Outcome of a single sync cycle, returned to the CLI/hook caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncCycleResult {
    pub status: String,
    pub pushed_count: usize,
    pub pulled_count: usize,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_seconds(0), 5);
        assert_eq!(backoff_seconds(1), 10);
        assert_eq!(backoff_seconds(2), 20);
        assert_eq!(backoff_seconds(8), backoff_seconds(9));
        assert_eq!(backoff_seconds(100), backoff_seconds(8));
    }

    #[test]
    fn classify_matches_retry_class_table() {
        assert_eq!(classify_http_status(401), SyncRetryClass::ReauthRequired);
        assert_eq!(classify_http_status(429), SyncRetryClass::Retryable);
        assert_eq!(classify_http_status(503), SyncRetryClass::Retryable);
        assert_eq!(classify_http_status(418), SyncRetryClass::Permanent);
    }
}
