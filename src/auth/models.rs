//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Role stored on a user record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Role named in a token claim; unknown names get no privileges
    pub fn from_claim(claim: &str) -> Self {
        match claim {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// OAuth identity providers this service can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Provider::GitHub),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// What the caller intends when an OAuth identity has no local user yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OAuthAction {
    #[default]
    Login,
    Register,
}

impl OAuthAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthAction::Login => "login",
            OAuthAction::Register => "register",
        }
    }
}

// ============================================================================
// Database records
// ============================================================================

/// User database model
#[derive(FromRow, Serialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub last_login_at: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Link between a user and a provider-assigned identity
#[derive(FromRow, Serialize, Debug, Clone)]
pub struct OAuthLinkedAccount {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub provider_id: String,
    pub provider_email: Option<String>,
    pub provider_username: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Single-use CSRF state of the redirect flow
#[derive(FromRow, Debug, Clone)]
pub struct OAuthCsrfState {
    pub state: String,
    pub nonce: String,
    pub provider: Provider,
    pub action: OAuthAction,
    pub redirect_url: Option<String>,
    pub client_ip: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Device authorization grant being polled by a client
#[derive(FromRow, Debug, Clone)]
pub struct OAuthDeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub provider: Provider,
    pub action: OAuthAction,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Space separated
    pub scopes: String,
    pub poll_interval: i64,
    pub attempts: i64,
    pub last_poll_at: Option<i64>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Provider identity waiting for the user to pick a username
#[derive(FromRow, Debug, Clone)]
pub struct OAuthPendingRegistration {
    pub temp_token: String,
    pub provider: Provider,
    pub provider_id: String,
    pub email: String,
    pub provider_username: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Stored API key; only the Argon2 hash of the secret is kept
#[derive(FromRow, Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Leading characters of the secret, stored in clear to narrow lookups
    pub lookup_prefix: String,
    pub key_hash: String,
    /// Space separated
    pub scopes: String,
    pub last_used_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
}

impl ApiKey {
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes.split_whitespace().map(str::to_string).collect()
    }
}

/// Scopes an API key can be granted
pub const API_KEY_SCOPES: [&str; 4] = ["rules:read", "rules:write", "profile:read", "profile:write"];

// ============================================================================
// Request context
// ============================================================================

/// Network origin of a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// How the caller proved its identity
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethod {
    Jwt,
    ApiKey { key_id: String },
}

/// A verified caller
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub email_verified: bool,
    pub method: AuthMethod,
    /// Granted scopes; JWT sessions hold every scope
    pub scopes: Vec<String>,
}

impl AuthIdentity {
    pub fn has_scope(&self, scope: &str) -> bool {
        match self.method {
            AuthMethod::Jwt => true,
            AuthMethod::ApiKey { .. } => self.scopes.iter().any(|s| s == scope),
        }
    }
}

// ============================================================================
// API payloads
// ============================================================================

/// Public view of the authenticated user
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role,
            email_verified: user.email_verified,
            display_name: user.display_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Serialize, Debug)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OAuthInitializeRequest {
    pub provider: String,
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub action: OAuthAction,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OAuthInitializeResponse {
    pub authorization_url: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct OAuthCallbackRequest {
    pub provider: String,
    pub code: Option<String>,
    pub state: Option<String>,
    /// Error reported by the provider on its redirect
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct DeviceInitializeRequest {
    pub provider: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub action: Option<OAuthAction>,
}

#[derive(Serialize, Debug, Clone)]
pub struct DeviceInitializeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCallbackRequest {
    #[serde(alias = "device_code")]
    pub device_code: String,
}

#[derive(Deserialize, Debug)]
pub struct CheckUsernameQuery {
    pub username: String,
}

#[derive(Serialize, Debug)]
pub struct CheckUsernameResponse {
    pub available: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRegistrationRequest {
    pub temp_token: String,
    pub username: String,
}

/// Tokens plus the user they were issued for
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: AuthUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Returned instead of tokens when a new OAuth identity must pick a username
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistrationResponse {
    pub temp_token: String,
    pub provider: Provider,
    pub requires_username: bool,
}

/// Result of identity resolution
#[derive(Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum AuthOutcome {
    Authenticated(AuthResponse),
    RegistrationRequired(PendingRegistrationResponse),
}

/// RFC 8628 soft outcome returned while a device grant is not complete
#[derive(Serialize, Debug, Clone)]
pub struct DevicePollStatus {
    pub error: &'static str,
    pub error_description: String,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum DeviceCallbackResponse {
    Completed(AuthOutcome),
    Status(DevicePollStatus),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_in_days: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyResponse {
    pub id: String,
    /// Plaintext key; shown once
    pub key: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<i64>,
}
