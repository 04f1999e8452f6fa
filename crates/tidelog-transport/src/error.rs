//! Transport-layer errors and the offline-vs-fatal classification that the
//! Sync Engine relies on (§4.3).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Whether a failed request should be treated as "the relay is
/// unreachable right now" (continue, retry later) or as a hard failure
/// that should surface to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Offline,
    Fatal,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relay returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("simulated network error")]
    Simulated,
}

impl TransportError {
    /// Classifies this error per §4.3: DNS failure, connection
    /// refused/reset, network unreachable, TLS handshake timeout, EOF, I/O
    /// timeout, and HTTP 502/503 are all "offline"; everything else is
    /// fatal.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            TransportError::Simulated => RetryClass::Offline,
            TransportError::Status { status, .. } => match status {
                502 | 503 => RetryClass::Offline,
                _ => RetryClass::Fatal,
            },
            TransportError::Http(err) => {
                if is_offline_reqwest_error(err) {
                    RetryClass::Offline
                } else {
                    RetryClass::Fatal
                }
            }
            TransportError::Json(_) => RetryClass::Fatal,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.retry_class() == RetryClass::Offline
    }
}

fn is_offline_reqwest_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    let text = err.to_string().to_lowercase();
    [
        "dns",
        "connection refused",
        "connection reset",
        "network unreachable",
        "tls handshake",
        "unexpected eof",
        "eof while parsing",
        "timed out",
    ]
    .iter()
    .any(|needle| text.contains(needle))
}

/// When the relay's `/api/v1/ping` probe has failed, the caller may want to
/// treat *every* subsequent error this session as offline regardless of its
/// own classification; this is a thin helper for that override, kept
/// separate from [`TransportError::retry_class`] so the underlying
/// classification logic stays pure.
pub fn classify_with_ping_override(err: &TransportError, ping_failed: bool) -> RetryClass {
    if ping_failed {
        RetryClass::Offline
    } else {
        err.retry_class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_502_and_503_are_offline() {
        assert_eq!(
            TransportError::Status { status: 502, body: String::new() }.retry_class(),
            RetryClass::Offline
        );
        assert_eq!(
            TransportError::Status { status: 503, body: String::new() }.retry_class(),
            RetryClass::Offline
        );
    }

    #[test]
    fn other_statuses_are_fatal() {
        assert_eq!(
            TransportError::Status { status: 500, body: String::new() }.retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(
            TransportError::Status { status: 400, body: String::new() }.retry_class(),
            RetryClass::Fatal
        );
    }

    #[test]
    fn simulated_error_is_always_offline() {
        assert_eq!(TransportError::Simulated.retry_class(), RetryClass::Offline);
    }

    #[test]
    fn ping_failure_overrides_classification_to_offline() {
        let err = TransportError::Status { status: 400, body: String::new() };
        assert_eq!(classify_with_ping_override(&err, true), RetryClass::Offline);
        assert_eq!(classify_with_ping_override(&err, false), RetryClass::Fatal);
    }
}
