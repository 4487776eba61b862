//! Bearer token supply.
//!
//! Tokens are minted and refreshed elsewhere; this crate only asks for one
//! when a session run is opened.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::CoreError;

#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Token to use for `user_id`'s remote calls.
    async fn token_for(&self, user_id: &str) -> Result<SecretString, CoreError>;
}

/// Supplies the same token for every user.
#[derive(Debug)]
pub struct StaticCredentials {
    token: SecretString,
}

impl StaticCredentials {
    /// # Errors
    ///
    /// Returns `CoreError::Credentials` for an empty token.
    pub fn new(token: impl Into<String>) -> Result<Self, CoreError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(CoreError::Credentials("token is empty".to_owned()));
        }
        Ok(Self {
            token: SecretString::from(token),
        })
    }
}

#[async_trait]
impl CredentialSupplier for StaticCredentials {
    async fn token_for(&self, _user_id: &str) -> Result<SecretString, CoreError> {
        Ok(SecretString::from(self.token.expose_secret().to_owned()))
    }
}
