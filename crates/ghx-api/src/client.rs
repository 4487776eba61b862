//! Retrying API client.
//!
//! [`ApiClient`] wraps every remote call with the retry policy:
//!
//! - **Rate limited** (`403`/`429` with zero quota remaining): wait until the
//!   reported reset time, then retry while retry budget remains. A reset
//!   further away than `max_rate_limit_wait` raises immediately.
//! - **Server error** (`5xx`, timeout, connection failure): linear backoff of
//!   `backoff_base * (attempt + 1)` before each retry.
//! - **Client error** (any other non-2xx): raised immediately.
//!
//! Responses are classified exactly once, in [`classify`]; nothing downstream
//! re-inspects status codes or headers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use typed_builder::TypedBuilder;

use crate::error::ApiError;
use crate::rate_limit::{RateLimitState, now_epoch_ms, wait_until};
use crate::transport::{HttpResponse, Transport, TransportError};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Longest response-body excerpt carried into an error message.
const MAX_MESSAGE_CHARS: usize = 200;

/// Retry and timeout policy for [`ApiClient`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ghx_api::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .max_retries(5)
///     .request_timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(config.max_retries(), 5);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct ClientConfig {
    /// Retries allowed after the first attempt.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Upper bound on a single call, including reading the body.
    #[builder(default = Duration::from_secs(10))]
    request_timeout: Duration,

    /// Unit of the linear backoff applied to server errors.
    #[builder(default = Duration::from_millis(1000))]
    backoff_base: Duration,

    /// Longest rate-limit wait the client will sit through.
    #[builder(default = Duration::from_secs(900))]
    max_rate_limit_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientConfig {
    /// Returns the retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the per-call timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the backoff unit.
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Returns the maximum rate-limit wait.
    pub fn max_rate_limit_wait(&self) -> Duration {
        self.max_rate_limit_wait
    }

    /// Delay before retry number `attempt + 1` after a server error.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt.saturating_add(1))
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// `reset_at` is `None` when the response carried no reset hint.
    RateLimited { status: u16, reset_at: Option<u64> },
    ServerError { status: Option<u16>, message: String },
    ClientError { status: u16, message: String },
}

/// Classify the outcome of one attempt.
///
/// `now_secs` is the current epoch time, used when the service asks for a
/// relative `retry-after` instead of an absolute reset.
pub fn classify(
    outcome: Result<HttpResponse, TransportError>,
    now_secs: u64,
) -> Result<HttpResponse, Failure> {
    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            return Err(Failure::ServerError {
                status: None,
                message: e.to_string(),
            });
        }
    };

    if response.is_success() {
        return Ok(response);
    }

    let status = response.status;
    let quota = RateLimitState::from_response(&response);
    let rate_limited = match status {
        403 => quota.is_exhausted() || quota.retry_after.is_some(),
        429 => true,
        _ => false,
    };

    if rate_limited {
        Err(Failure::RateLimited {
            status,
            reset_at: quota.reset_epoch(now_secs),
        })
    } else if (500..600).contains(&status) {
        Err(Failure::ServerError {
            status: Some(status),
            message: summarize_body(&response.body),
        })
    } else {
        Err(Failure::ClientError {
            status,
            message: summarize_body(&response.body),
        })
    }
}

/// Reduce a response body to a short, log-safe message.
///
/// GitHub error bodies carry a `message` field; anything else is truncated.
fn summarize_body(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned());

    if message.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        message
    }
}

/// Authenticated client that applies the retry policy to every call.
///
/// Only GET-style, idempotent calls go through this client; retries repeat
/// the call verbatim.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    token: SecretString,
    config: ClientConfig,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client over `transport` authenticated with `token`.
    pub fn new(transport: Arc<dyn Transport>, token: SecretString, config: ClientConfig) -> Self {
        Self {
            transport,
            token,
            config,
        }
    }

    /// Returns the retry policy.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET `path_and_query` and return the successful response.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn get(&self, path_and_query: &str) -> Result<HttpResponse, ApiError> {
        self.execute(|| self.transport.get(path_and_query, &self.token))
            .await
    }

    /// GET `path_and_query` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Decode` if the body does not match `T`, otherwise
    /// see [`execute`](Self::execute).
    pub async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, ApiError> {
        let response = self.get(path_and_query).await?;
        serde_json::from_str(&response.body)
            .map_err(|e| ApiError::Decode(format!("{path_and_query}: {e}")))
    }

    /// Run `call` under the retry policy.
    ///
    /// `call` performs one remote request and must be safe to repeat. Each
    /// attempt is bounded by the request timeout; a timed-out attempt counts
    /// as a server error.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::RateLimitExceeded` when quota stays exhausted,
    /// `ApiError::TransientServiceError` when server errors outlast the retry
    /// budget, and `ApiError::PermanentError` for any other rejection.
    #[instrument(skip_all, fields(max_retries = self.config.max_retries))]
    pub async fn execute<F, Fut>(&self, mut call: F) -> Result<HttpResponse, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, TransportError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let outcome = match tokio::time::timeout(self.config.request_timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(self.config.request_timeout)),
            };

            let now_ms = now_epoch_ms();
            match classify(outcome, now_ms / 1000) {
                Ok(response) => {
                    let quota = RateLimitState::from_response(&response);
                    debug!(
                        attempt,
                        status = response.status,
                        remaining = ?quota.remaining,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Err(Failure::RateLimited { status, reset_at }) => {
                    // No reset hint: back off as for a server error.
                    let wait = match reset_at {
                        Some(reset_at) => wait_until(reset_at, now_ms),
                        None => self.config.backoff_for(attempt),
                    };
                    let reset_at =
                        reset_at.unwrap_or_else(|| (now_ms / 1000).saturating_add(wait.as_secs()));
                    if attempt >= self.config.max_retries
                        || wait > self.config.max_rate_limit_wait
                    {
                        warn!(
                            attempt,
                            status,
                            reset_at,
                            wait_ms = wait.as_millis() as u64,
                            "rate limit exceeded, giving up"
                        );
                        return Err(ApiError::RateLimitExceeded {
                            status,
                            remaining: 0,
                            reset_at,
                        });
                    }
                    warn!(
                        attempt,
                        status,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, waiting for quota reset"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(Failure::ServerError { status, message }) => {
                    if attempt >= self.config.max_retries {
                        warn!(attempt, ?status, %message, "server error, retries exhausted");
                        return Err(ApiError::TransientServiceError {
                            status,
                            attempts: attempt + 1,
                            message,
                        });
                    }
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        attempt,
                        ?status,
                        %message,
                        delay_ms = delay.as_millis() as u64,
                        "server error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Failure::ClientError { status, message }) => {
                    debug!(attempt, status, %message, "request rejected");
                    return Err(ApiError::PermanentError { status, message });
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mock::MockTransport;

    const PATH: &str = "/repos/octo/hello";

    fn client(mock: &Arc<MockTransport>, max_retries: u32) -> ApiClient {
        let config = ClientConfig::builder().max_retries(max_retries).build();
        ApiClient::new(
            Arc::clone(mock) as Arc<dyn Transport>,
            SecretString::from("test-token"),
            config,
        )
    }

    fn now_secs() -> u64 {
        now_epoch_ms() / 1000
    }

    fn rate_limited(reset_at: u64) -> HttpResponse {
        HttpResponse::new(403, r#"{"message":"API rate limit exceeded"}"#)
            .with_header("x-ratelimit-remaining", "0")
            .with_header("x-ratelimit-reset", reset_at.to_string())
    }

    #[test]
    fn test_should_classify_exhausted_forbidden_as_rate_limited() {
        let result = classify(Ok(rate_limited(1_234)), 1_000);
        assert_eq!(
            result.unwrap_err(),
            Failure::RateLimited {
                status: 403,
                reset_at: Some(1_234)
            }
        );
    }

    #[test]
    fn test_should_classify_forbidden_with_quota_as_client_error() {
        let response = HttpResponse::new(403, r#"{"message":"Resource not accessible"}"#)
            .with_header("x-ratelimit-remaining", "4999");
        let result = classify(Ok(response), 1_000);
        assert_eq!(
            result.unwrap_err(),
            Failure::ClientError {
                status: 403,
                message: "Resource not accessible".to_owned()
            }
        );
    }

    #[test]
    fn test_should_classify_retry_after_relative_to_now() {
        let response = HttpResponse::new(429, "").with_header("retry-after", "60");
        let result = classify(Ok(response), 1_000);
        assert_eq!(
            result.unwrap_err(),
            Failure::RateLimited {
                status: 429,
                reset_at: Some(1_060)
            }
        );
    }

    #[test]
    fn test_should_classify_timeouts_and_5xx_as_server_errors() {
        let timeout = classify(Err(TransportError::Timeout(Duration::from_secs(10))), 0);
        assert!(matches!(
            timeout,
            Err(Failure::ServerError { status: None, .. })
        ));

        let bad_gateway = classify(Ok(HttpResponse::new(502, "bad gateway")), 0);
        assert_eq!(
            bad_gateway.unwrap_err(),
            Failure::ServerError {
                status: Some(502),
                message: "bad gateway".to_owned()
            }
        );
    }

    #[test]
    fn test_should_truncate_long_error_bodies() {
        let body = "x".repeat(1_000);
        let message = summarize_body(&body);
        assert_eq!(message.chars().count(), MAX_MESSAGE_CHARS + 3);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_should_compute_linear_backoff() {
        let config = ClientConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(1), Duration::from_millis(2000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_should_decode_json_on_success() {
        let mock = Arc::new(MockTransport::new());
        mock.json(PATH, 200, json!({"default_branch": "main"}));

        let value: serde_json::Value = client(&mock, 3)
            .get_json(PATH)
            .await
            .expect("should succeed");
        assert_eq!(value["default_branch"], "main");
        assert_eq!(mock.request_count(PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_wait_for_reset_and_retry_rate_limited_call() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, rate_limited(now_secs() + 2))
            .json(PATH, 200, json!({"ok": true}));

        let started = tokio::time::Instant::now();
        let response = client(&mock, 1).get(PATH).await.expect("should succeed");
        let waited = started.elapsed();

        assert_eq!(response.status, 200);
        assert_eq!(mock.request_count(PATH), 2);
        assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(3), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_raise_rate_limit_exceeded_when_budget_exhausted() {
        let mock = Arc::new(MockTransport::new());
        let reset_at = now_secs() + 1;
        mock.respond(PATH, rate_limited(reset_at));

        let err = client(&mock, 2).get(PATH).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::RateLimitExceeded {
                status: 403,
                remaining: 0,
                reset_at
            }
        );
        // First attempt plus two retries.
        assert_eq!(mock.request_count(PATH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_not_wait_beyond_max_rate_limit_wait() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, rate_limited(now_secs() + 3_600));

        let config = ClientConfig::builder()
            .max_rate_limit_wait(Duration::from_secs(60))
            .build();
        let client = ApiClient::new(
            Arc::clone(&mock) as Arc<dyn Transport>,
            SecretString::from("test-token"),
            config,
        );

        let started = tokio::time::Instant::now();
        let err = client.get(PATH).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimitExceeded { .. }));
        assert_eq!(mock.request_count(PATH), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_should_classify_rate_limit_without_reset_hint() {
        let response = HttpResponse::new(429, r#"{"message":"slow down"}"#);
        let result = classify(Ok(response), 1_000);
        assert_eq!(
            result.unwrap_err(),
            Failure::RateLimited {
                status: 429,
                reset_at: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_back_off_when_rate_limit_has_no_reset_hint() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, HttpResponse::new(429, r#"{"message":"slow down"}"#));

        let client = ApiClient::new(
            Arc::clone(&mock) as Arc<dyn Transport>,
            SecretString::from("test-token"),
            ClientConfig::builder().build(),
        );

        let started = tokio::time::Instant::now();
        let err = client.get(PATH).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::RateLimitExceeded { status: 429, .. }
        ));
        assert_eq!(mock.request_count(PATH), 4);
        // 1000ms, 2000ms and 3000ms between the four attempts.
        assert!(
            started.elapsed() >= Duration::from_secs(6),
            "waited {:?}",
            started.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_back_off_linearly_on_server_errors() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, HttpResponse::new(502, "bad gateway"))
            .respond(PATH, HttpResponse::new(503, "unavailable"))
            .json(PATH, 200, json!({}));

        let started = tokio::time::Instant::now();
        client(&mock, 3).get(PATH).await.expect("should recover");

        // 1000ms after the first failure, 2000ms after the second.
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(4000));
        assert_eq!(mock.request_count(PATH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_raise_transient_error_after_retries() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, HttpResponse::new(500, r#"{"message":"boom"}"#));

        let err = client(&mock, 2).get(PATH).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::TransientServiceError {
                status: Some(500),
                attempts: 3,
                message: "boom".to_owned()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_count_timeouts_as_failed_attempts() {
        let mock = Arc::new(MockTransport::new());
        mock.hang(PATH).json(PATH, 200, json!({}));

        let response = client(&mock, 1).get(PATH).await.expect("should recover");
        assert_eq!(response.status, 200);
        assert_eq!(mock.request_count(PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_not_retry_client_errors() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, HttpResponse::new(404, r#"{"message":"Not Found"}"#));

        let err = client(&mock, 3).get(PATH).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(mock.request_count(PATH), 1);
    }

    #[tokio::test]
    async fn test_should_report_decode_errors() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(PATH, HttpResponse::new(200, "not json"));

        let err = client(&mock, 3)
            .get_json::<serde_json::Value>(PATH)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_should_not_leak_token_in_debug_output() {
        let mock = Arc::new(MockTransport::new());
        let rendered = format!("{:?}", client(&mock, 3));
        assert!(!rendered.contains("test-token"));
    }
}
