mod client;
mod error;
#[cfg(any(test, feature = "test-support"))]
mod mock;
mod rate_limit;
mod transport;

pub use client::{ApiClient, ClientConfig, DEFAULT_MAX_RETRIES, Failure, classify};
pub use error::ApiError;
#[cfg(any(test, feature = "test-support"))]
pub use mock::{MockReply, MockTransport};
pub use rate_limit::{RateLimitState, wait_until};
pub use secrecy::SecretString;
pub use transport::{HttpResponse, ReqwestTransport, Transport, TransportError};
