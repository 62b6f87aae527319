// src/services/oauth_provider.rs
//! Contract every OAuth identity provider adapter implements

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::models::Provider;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with an RFC 6749 error code
    #[error("OAuth error from provider: {error}")]
    OAuth {
        error: String,
        description: Option<String>,
    },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected provider response: {0}")]
    UnexpectedResponse(String),

    #[error("Provider account has no verified email")]
    NoVerifiedEmail,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::UnexpectedResponse(e.to_string())
        } else {
            ProviderError::RequestFailed(e.to_string())
        }
    }
}

/// Identity reported by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub id: String,
    /// Primary verified email, or the first verified one
    pub email: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Provider-issued device authorization (RFC 8628 section 3.2)
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: i64,
    pub interval: i64,
}

/// Result of one poll of the provider's token endpoint with a device code
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceTokenPoll {
    /// Provider access token
    Granted(String),
    Pending,
    SlowDown,
    AccessDenied,
    Expired,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// URL the browser is sent to for the authorization-code flow
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Exchange an authorization code for a provider access token
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, ProviderError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;

    async fn request_device_code(
        &self,
        scopes: &[String],
    ) -> Result<DeviceAuthorization, ProviderError>;

    async fn poll_device_token(&self, device_code: &str) -> Result<DeviceTokenPoll, ProviderError>;
}

/// Configured providers; a provider missing here is not configured
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn OAuthProvider>) {
        self.providers.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(&provider).cloned()
    }

    pub fn configured(&self) -> Vec<Provider> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.configured())
            .finish()
    }
}
