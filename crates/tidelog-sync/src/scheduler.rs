//! Interval constants for the jittered periodic pull/push loop (SPEC_FULL
//! §C.2), grounded on the teacher's own foreground sync cadence.

pub const FOREGROUND_INTERVAL_SECS: u64 = 45;
pub const INTERVAL_JITTER_SECS: u64 = 5;
pub const FAST_RETRY_INTERVAL_MS: u64 = 2_000;

/// Computes the next sleep duration for the background sync loop: the
/// foreground interval plus bounded jitter, shortened to `next_retry_at` if
/// the engine status names one, shortened further still if there is
/// pending outbox-equivalent work (a set missed-uploads flag).
pub fn next_sleep_millis(now_unix_ms: i64, next_retry_at_unix_s: Option<i64>, have_pending_work: bool) -> u64 {
    let jitter_ms = (now_unix_ms.unsigned_abs() % (INTERVAL_JITTER_SECS * 1000)) as u64;
    let mut delay_ms = FOREGROUND_INTERVAL_SECS * 1000 + jitter_ms;

    if let Some(retry_at_s) = next_retry_at_unix_s {
        let retry_at_ms = retry_at_s * 1000;
        let now_ms = now_unix_ms;
        if retry_at_ms > now_ms {
            delay_ms = delay_ms.min((retry_at_ms - now_ms) as u64);
        }
    }

    if have_pending_work {
        delay_ms = delay_ms.min(FAST_RETRY_INTERVAL_MS + jitter_ms % 500);
    }

    delay_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_is_close_to_foreground_interval() {
        let delay = next_sleep_millis(1_000_000, None, false);
        assert!(delay >= FOREGROUND_INTERVAL_SECS * 1000);
        assert!(delay < (FOREGROUND_INTERVAL_SECS + INTERVAL_JITTER_SECS) * 1000);
    }

    #[test]
    fn pending_work_shortens_delay() {
        let delay = next_sleep_millis(1_000_000, None, true);
        assert!(delay < FAST_RETRY_INTERVAL_MS + 500);
    }

    #[test]
    fn next_retry_at_can_shorten_delay() {
        let now_ms = 1_000_000_000;
        let retry_at_s = now_ms / 1000 + 3;
        let delay = next_sleep_millis(now_ms, Some(retry_at_s), false);
        assert!(delay <= 3_000 + 200);
    }
}
