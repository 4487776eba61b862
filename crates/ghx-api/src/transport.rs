//! Transport seam between the retry policy and the network.
//!
//! A [`Transport`] performs exactly one GET against the remote service and
//! reports what came back. It never retries, sleeps, or interprets status
//! codes; that is the job of [`ApiClient`](crate::ApiClient).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

/// Media type requested from the GitHub REST API.
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// REST API version pinned on every request.
const GITHUB_API_VERSION: &str = "2022-11-28";

/// A raw response as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Create a response with no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Add a header (name is lowercased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures that happen before a status code is available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP stack gave up without reporting which deadline it hit.
    #[error("request timed out")]
    TimedOut,

    #[error("connection failed: {0}")]
    Connect(String),
}

/// Performs a single authenticated GET request.
///
/// `path_and_query` is relative to the service base URL, for example
/// `/repos/octo/hello/branches?per_page=100&page=1`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        path_and_query: &str,
        token: &SecretString,
    ) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl ReqwestTransport {
    /// Create a transport for the given base URL (e.g. `https://api.github.com`).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the TLS backend cannot be
    /// initialized.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            user_agent: user_agent.to_owned(),
        })
    }

    /// Returns the base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        path_and_query: &str,
        token: &SecretString,
    ) -> Result<HttpResponse, TransportError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(path = path_and_query, "sending request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose_secret())
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header(USER_AGENT, &self.user_agent)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
            })
            .collect();
        let body = response.text().await.map_err(map_reqwest_error)?;

        debug!(path = path_and_query, status, "received response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    // The URL never carries credentials, but strip it to keep messages short.
    let e = e.without_url();
    if e.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Connect(e.to_string())
    }
}
