//! Quota bookkeeping derived from response headers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::transport::HttpResponse;

/// Transient view of the remote quota, rebuilt from every response.
///
/// Never persisted; only used to decide whether to wait before a retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Calls remaining in the current window (`x-ratelimit-remaining`).
    pub remaining: Option<u32>,
    /// Epoch seconds at which the window resets (`x-ratelimit-reset`).
    pub reset_at: Option<u64>,
    /// Seconds to wait as requested by `retry-after`.
    pub retry_after: Option<u64>,
}

impl RateLimitState {
    /// Parse quota headers from a response. Unparseable values are ignored.
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            remaining: parse_header(response, "x-ratelimit-remaining"),
            reset_at: parse_header(response, "x-ratelimit-reset"),
            retry_after: parse_header(response, "retry-after"),
        }
    }

    /// Returns true when the service reported zero remaining quota.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Epoch seconds at which a retry may succeed.
    ///
    /// Prefers the explicit reset header, then `retry-after` relative to
    /// `now_secs`. `None` when the service sent neither.
    pub fn reset_epoch(&self, now_secs: u64) -> Option<u64> {
        self.reset_at
            .or_else(|| self.retry_after.map(|secs| now_secs.saturating_add(secs)))
    }
}

/// Time to wait until `reset_at` (epoch seconds), never negative.
pub fn wait_until(reset_at: u64, now_ms: u64) -> Duration {
    let reset_ms = reset_at.saturating_mul(1000);
    Duration::from_millis(reset_ms.saturating_sub(now_ms))
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

fn parse_header<T: std::str::FromStr>(response: &HttpResponse, name: &str) -> Option<T> {
    response.header(name).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_quota_headers() {
        let response = HttpResponse::new(403, "")
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Reset", "1700000000");

        let state = RateLimitState::from_response(&response);
        assert_eq!(state.remaining, Some(0));
        assert_eq!(state.reset_at, Some(1_700_000_000));
        assert!(state.is_exhausted());
    }

    #[test]
    fn test_should_ignore_malformed_headers() {
        let response = HttpResponse::new(403, "")
            .with_header("x-ratelimit-remaining", "lots")
            .with_header("x-ratelimit-reset", "");

        let state = RateLimitState::from_response(&response);
        assert_eq!(state, RateLimitState::default());
        assert!(!state.is_exhausted());
    }

    #[test]
    fn test_should_compute_wait_until_reset() {
        assert_eq!(wait_until(100, 98_500), Duration::from_millis(1_500));
        assert_eq!(wait_until(100, 100_000), Duration::ZERO);
        // Reset in the past never produces a negative wait.
        assert_eq!(wait_until(100, 250_000), Duration::ZERO);
    }

    #[test]
    fn test_should_fall_back_to_retry_after_for_reset_epoch() {
        let state = RateLimitState {
            remaining: None,
            reset_at: None,
            retry_after: Some(30),
        };
        assert_eq!(state.reset_epoch(1_000), Some(1_030));

        let explicit = RateLimitState {
            reset_at: Some(2_000),
            ..state
        };
        assert_eq!(explicit.reset_epoch(1_000), Some(2_000));

        assert_eq!(RateLimitState::default().reset_epoch(1_000), None);
    }
}
