// src/auth/service.rs
//! Auth orchestration: token lifecycle, the redirect flow, identity
//! resolution and API keys. The device flow lives in `device.rs`.

use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::AuthError;
use super::models::*;
use super::repository::{is_unique_violation, AccountStore, NewUser};
use super::security::{self, StatePayload};
use super::state_store::OAuthStateStore;
use super::validators::{
    validate_username, CompleteRegistrationValidator, CreateApiKeyValidator, RegisterValidator,
};
use crate::common::config::{JwtConfig, OAuthConfig};
use crate::common::i18n::Message;
use crate::common::{generate_api_key_id, generate_secure_token, now_ts, safe_email_log, Validator};
use crate::services::oauth_provider::{OAuthProvider, ProviderError, ProviderProfile, ProviderRegistry};
use crate::services::password::SecretHasher;
use crate::services::tokens::{TokenService, TokenSubject, TokenVerification};

/// Prefix of every API key handed out
pub const API_KEY_PREFIX: &str = "rk_";

/// Bytes of randomness in state keys, temp tokens and API key secrets
pub(crate) const SECRET_BYTES: usize = 32;

/// Characters after [`API_KEY_PREFIX`] kept in clear to index key lookups
const API_KEY_LOOKUP_LEN: usize = 8;

/// Indexable head of an API key, `None` when the credential is too short
fn api_key_lookup_prefix(key: &str) -> Option<&str> {
    let secret = key.strip_prefix(API_KEY_PREFIX)?;
    secret.get(..API_KEY_LOOKUP_LEN)
}

pub struct AuthService {
    pub(crate) accounts: AccountStore,
    pub(crate) states: OAuthStateStore,
    pub(crate) tokens: TokenService,
    pub(crate) providers: ProviderRegistry,
    pub(crate) hasher: SecretHasher,
    pub(crate) config: OAuthConfig,
}

impl AuthService {
    pub fn new(
        db: SqlitePool,
        jwt: &JwtConfig,
        config: OAuthConfig,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            accounts: AccountStore::new(db.clone()),
            states: OAuthStateStore::new(db),
            tokens: TokenService::new(jwt),
            providers,
            hasher: SecretHasher::default(),
            config,
        }
    }

    pub fn state_store(&self) -> &OAuthStateStore {
        &self.states
    }

    pub(crate) fn provider_adapter(
        &self,
        provider: Provider,
    ) -> Result<Arc<dyn OAuthProvider>, AuthError> {
        self.providers
            .get(provider)
            .ok_or(AuthError::ProviderNotConfigured(provider))
    }

    // ============================================================================
    // Token lifecycle
    // ============================================================================

    /// Update last-login and hand out a fresh token pair
    pub(crate) async fn issue_session(&self, user: &User) -> Result<AuthResponse, AuthError> {
        self.accounts.touch_last_login(&user.id).await?;

        let pair = self.tokens.issue_pair(TokenSubject {
            id: &user.id,
            email: &user.email,
            username: &user.username,
            role: user.role.as_str(),
            email_verified: user.email_verified,
        })?;

        Ok(AuthResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: AuthUser::from(user),
            redirect_url: None,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        let user_id = match self.tokens.verify_refresh_token(refresh_token) {
            TokenVerification::Valid(user_id) => user_id,
            TokenVerification::Invalid => return Err(AuthError::Unauthorized(Message::InvalidToken)),
        };

        let user = self
            .accounts
            .find_user_by_id(&user_id)
            .await?
            .ok_or(AuthError::Unauthorized(Message::UserNotFound))?;

        debug!(user_id = %user.id, "Refreshing session");
        self.issue_session(&user).await
    }

    /// Tokens are stateless; logout only confirms the refresh token is ours
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        match self.tokens.verify_refresh_token(refresh_token) {
            TokenVerification::Valid(user_id) => {
                info!(user_id = %user_id, "User logged out");
                Ok(())
            }
            TokenVerification::Invalid => Err(AuthError::Unauthorized(Message::InvalidToken)),
        }
    }

    // ============================================================================
    // Password accounts
    // ============================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let user = self.accounts.find_user_by_email(email).await?;
        let verified = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(hash) => self.hasher.verify(hash, password).await?,
            None => false,
        };

        // Unknown email, OAuth-only account and wrong password look the same
        let user = match user {
            Some(user) if verified => user,
            _ => {
                warn!(email = %safe_email_log(email), "Failed password login");
                return Err(AuthError::Unauthorized(Message::InvalidCredentials));
            }
        };

        info!(user_id = %user.id, "User logged in with password");
        self.issue_session(&user).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, AuthError> {
        AuthError::check(RegisterValidator.validate(request))?;

        if self.accounts.find_user_by_email(&request.email).await?.is_some() {
            return Err(AuthError::Conflict(Message::EmailTaken));
        }
        if self.accounts.username_exists(&request.username).await? {
            return Err(AuthError::Conflict(Message::UsernameTaken));
        }

        let password_hash = self.hasher.hash(&request.password).await?;
        let user = self
            .accounts
            .create_user(NewUser {
                email: &request.email,
                username: &request.username,
                password_hash: Some(&password_hash),
                email_verified: false,
                display_name: None,
            })
            .await
            .map_err(|e| self.conflict_or_database(e))?;

        info!(
            user_id = %user.id,
            email = %safe_email_log(&user.email),
            "New user registered with password"
        );
        self.issue_session(&user).await
    }

    /// A concurrent insert may win between the pre-checks and ours
    fn conflict_or_database(&self, e: sqlx::Error) -> AuthError {
        if is_unique_violation(&e) {
            let message = e.to_string();
            if message.contains("users.email") {
                AuthError::Conflict(Message::EmailTaken)
            } else {
                AuthError::Conflict(Message::UsernameTaken)
            }
        } else {
            AuthError::Database(e)
        }
    }

    // ============================================================================
    // Redirect flow
    // ============================================================================

    pub async fn initialize_oauth(
        &self,
        request: &OAuthInitializeRequest,
        client: &ClientInfo,
    ) -> Result<OAuthInitializeResponse, AuthError> {
        let provider = parse_provider(&request.provider)?;
        let adapter = self.provider_adapter(provider)?;
        let redirect_url =
            security::validate_redirect_url(request.redirect_url.as_deref(), &self.config.frontend_url)?;

        security::maybe_sweep(&self.states);
        security::check_state_abuse(
            &self.states,
            client.ip.as_deref(),
            self.config.max_pending_states_per_ip,
        )
        .await?;

        let payload = StatePayload::generate(request.action);
        let now = now_ts();
        self.states
            .insert_state(&OAuthCsrfState {
                state: payload.key.clone(),
                nonce: payload.nonce.clone(),
                provider,
                action: request.action,
                redirect_url: Some(redirect_url),
                client_ip: client.ip.clone(),
                created_at: now,
                expires_at: now + self.config.state_ttl_seconds,
            })
            .await?;

        let authorization_url = adapter.authorization_url(
            &payload.encode(),
            &self.config.callback_url(provider.as_str()),
        );

        info!(provider = %provider, action = %request.action.as_str(), "OAuth flow initiated");
        Ok(OAuthInitializeResponse { authorization_url })
    }

    pub async fn oauth_callback(
        &self,
        request: &OAuthCallbackRequest,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, AuthError> {
        let provider = parse_provider(&request.provider)?;
        let adapter = self.provider_adapter(provider)?;

        if let Some(provider_error) = request.error.as_deref() {
            // Burn the state so it cannot be replayed with a code later
            if let Some(payload) = request.state.as_deref().and_then(StatePayload::decode) {
                if let Err(e) = self.states.take_state(&payload.key).await {
                    warn!(error = %e, "Failed to discard OAuth state after provider error");
                }
            }
            warn!(
                provider = %provider,
                error = %provider_error,
                description = request.error_description.as_deref().unwrap_or(""),
                "Provider reported an OAuth error on callback"
            );
            return Err(AuthError::BadRequest(security::map_provider_error(provider_error)));
        }

        let (code, state) =
            security::validate_callback_params(request.code.as_deref(), request.state.as_deref())?;
        let payload =
            StatePayload::decode(state).ok_or(AuthError::BadRequest(Message::InvalidState))?;

        let stored = self
            .states
            .take_state(&payload.key)
            .await?
            .ok_or(AuthError::BadRequest(Message::InvalidState))?;

        if stored.provider != provider
            || stored.nonce != payload.nonce
            || stored.action != payload.action
            || stored.expires_at <= now_ts()
        {
            warn!(provider = %provider, "Rejected OAuth state: mismatched or expired");
            return Err(AuthError::BadRequest(Message::InvalidState));
        }

        security::log_ip_mismatch(stored.client_ip.as_deref(), client.ip.as_deref());

        let redirect_uri = self.config.callback_url(provider.as_str());
        let provider_token = adapter
            .exchange_code(code, &redirect_uri)
            .await
            .map_err(|e| provider_failure(provider, e, Message::ProviderFailure))?;
        let profile = adapter
            .fetch_profile(&provider_token)
            .await
            .map_err(|e| provider_failure(provider, e, Message::ProfileFetchFailed))?;

        let outcome = self.resolve_identity(provider, &profile, stored.action).await?;
        Ok(match outcome {
            AuthOutcome::Authenticated(mut response) => {
                response.redirect_url = stored.redirect_url;
                AuthOutcome::Authenticated(response)
            }
            pending => pending,
        })
    }

    // ============================================================================
    // Identity resolution
    // ============================================================================

    /// Map a provider identity onto a local user
    ///
    /// Linked account first, then a user with the same email (which gets
    /// linked), then either a pending registration or NOT_FOUND depending on
    /// `action`.
    pub async fn resolve_identity(
        &self,
        provider: Provider,
        profile: &ProviderProfile,
        action: OAuthAction,
    ) -> Result<AuthOutcome, AuthError> {
        if let Some(linked) = self.accounts.find_linked_account(provider, &profile.id).await? {
            let user = self
                .accounts
                .find_user_by_id(&linked.user_id)
                .await?
                .ok_or_else(|| {
                    error!(user_id = %linked.user_id, provider = %provider, "Linked account points at missing user");
                    AuthError::NotFound(Message::AccountNotFound)
                })?;
            debug!(user_id = %user.id, provider = %provider, "Resolved identity via linked account");
            return Ok(AuthOutcome::Authenticated(self.issue_session(&user).await?));
        }

        if let Some(user) = self.accounts.find_user_by_email(&profile.email).await? {
            self.accounts
                .link_account(
                    &user.id,
                    provider,
                    &profile.id,
                    Some(&profile.email),
                    profile.username.as_deref(),
                )
                .await?;
            return Ok(AuthOutcome::Authenticated(self.issue_session(&user).await?));
        }

        match action {
            OAuthAction::Login => {
                info!(
                    provider = %provider,
                    email = %safe_email_log(&profile.email),
                    "OAuth login for unknown identity"
                );
                Err(AuthError::NotFound(Message::AccountNotFound))
            }
            OAuthAction::Register => {
                let now = now_ts();
                let pending = OAuthPendingRegistration {
                    temp_token: generate_secure_token(SECRET_BYTES),
                    provider,
                    provider_id: profile.id.clone(),
                    email: profile.email.clone(),
                    provider_username: profile.username.clone(),
                    created_at: now,
                    expires_at: now + self.config.pending_registration_ttl_seconds,
                };
                self.states.insert_pending_registration(&pending).await?;

                info!(
                    provider = %provider,
                    email = %safe_email_log(&profile.email),
                    "OAuth registration pending username"
                );
                Ok(AuthOutcome::RegistrationRequired(PendingRegistrationResponse {
                    temp_token: pending.temp_token,
                    provider,
                    requires_username: true,
                }))
            }
        }
    }

    // ============================================================================
    // Pending registrations
    // ============================================================================

    /// Invalid usernames are reported as unavailable
    pub async fn check_username(&self, username: &str) -> Result<bool, AuthError> {
        if !validate_username(username).is_valid {
            return Ok(false);
        }
        Ok(!self.accounts.username_exists(username).await?)
    }

    pub async fn complete_registration(
        &self,
        request: &CompleteRegistrationRequest,
    ) -> Result<AuthResponse, AuthError> {
        AuthError::check(CompleteRegistrationValidator.validate(request))?;

        let pending = self
            .states
            .find_pending_registration(&request.temp_token)
            .await?
            .ok_or(AuthError::BadRequest(Message::InvalidTempToken))?;

        if pending.expires_at <= now_ts() {
            if let Err(e) = self.states.delete_pending_registration(&pending.temp_token).await {
                warn!(error = %e, "Failed to delete expired pending registration");
            }
            return Err(AuthError::BadRequest(Message::InvalidTempToken));
        }

        if self.accounts.username_exists(&request.username).await? {
            return Err(AuthError::Conflict(Message::UsernameTaken));
        }
        if self.accounts.find_user_by_email(&pending.email).await?.is_some() {
            return Err(AuthError::Conflict(Message::EmailTaken));
        }

        let user = self
            .accounts
            .complete_pending_registration(&pending, &request.username)
            .await
            .map_err(|e| self.conflict_or_database(e))?
            .ok_or(AuthError::BadRequest(Message::InvalidTempToken))?;

        self.issue_session(&user).await
    }

    // ============================================================================
    // API keys
    // ============================================================================

    pub async fn create_api_key(
        &self,
        user_id: &str,
        request: &CreateApiKeyRequest,
    ) -> Result<CreateApiKeyResponse, AuthError> {
        AuthError::check(CreateApiKeyValidator.validate(request))?;

        let key = format!("{}{}", API_KEY_PREFIX, generate_secure_token(SECRET_BYTES));
        let lookup_prefix = api_key_lookup_prefix(&key)
            .ok_or(AuthError::Internal(Message::InternalError))?
            .to_string();
        let key_hash = self.hasher.hash(&key).await?;
        let now = now_ts();
        let expires_at = request
            .expires_in_days
            .map(|days| now + Duration::days(days).num_seconds());

        let mut scopes = request.scopes.clone();
        scopes.sort();
        scopes.dedup();

        let record = ApiKey {
            id: generate_api_key_id(),
            user_id: user_id.to_string(),
            name: request.name.trim().to_string(),
            lookup_prefix,
            key_hash,
            scopes: scopes.join(" "),
            last_used_at: None,
            expires_at,
            revoked_at: None,
            created_at: now,
        };
        self.accounts.insert_api_key(&record).await?;

        info!(user_id = %user_id, key_id = %record.id, "API key created");
        Ok(CreateApiKeyResponse {
            id: record.id,
            key,
            name: record.name,
            scopes,
            expires_at,
        })
    }

    pub async fn revoke_api_key(&self, user_id: &str, key_id: &str) -> Result<(), AuthError> {
        if self.accounts.revoke_api_key(key_id, user_id).await? {
            info!(user_id = %user_id, key_id = %key_id, "API key revoked");
            Ok(())
        } else {
            Err(AuthError::NotFound(Message::ApiKeyNotFound))
        }
    }

    // ============================================================================
    // Request authentication
    // ============================================================================

    /// Resolve a presented credential to a caller
    ///
    /// API keys are tried first, then JWT access tokens. An unknown or
    /// invalid credential yields `Ok(None)`.
    pub async fn authenticate(&self, credential: &str) -> Result<Option<AuthIdentity>, AuthError> {
        if credential.starts_with(API_KEY_PREFIX) {
            if let Some(identity) = self.authenticate_api_key(credential).await? {
                return Ok(Some(identity));
            }
        }

        Ok(self.tokens.verify_access_token(credential).valid().map(|claims| AuthIdentity {
            user_id: claims.sub,
            username: claims.username,
            role: Role::from_claim(&claims.role),
            email_verified: claims.email_verified,
            method: AuthMethod::Jwt,
            scopes: Vec::new(),
        }))
    }

    async fn authenticate_api_key(&self, key: &str) -> Result<Option<AuthIdentity>, AuthError> {
        let Some(lookup_prefix) = api_key_lookup_prefix(key) else {
            return Ok(None);
        };
        let mut candidates = self
            .accounts
            .find_active_api_keys(lookup_prefix, now_ts())
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let hashes = candidates.iter().map(|k| k.key_hash.clone()).collect();
        let Some(index) = self.hasher.find_match(hashes, key).await? else {
            return Ok(None);
        };
        let record = candidates.swap_remove(index);

        self.accounts.mark_api_key_used(&record.id).await?;

        let Some(user) = self.accounts.find_user_by_id(&record.user_id).await? else {
            return Ok(None);
        };

        Ok(Some(AuthIdentity {
            user_id: user.id,
            username: user.username,
            role: user.role,
            email_verified: user.email_verified,
            scopes: record.scope_list(),
            method: AuthMethod::ApiKey { key_id: record.id },
        }))
    }

    /// Current record of an authenticated caller
    pub async fn current_user(&self, identity: &AuthIdentity) -> Result<AuthUser, AuthError> {
        self.accounts
            .find_user_by_id(&identity.user_id)
            .await?
            .map(|user| AuthUser::from(&user))
            .ok_or(AuthError::Unauthorized(Message::UserNotFound))
    }
}

pub(crate) fn parse_provider(raw: &str) -> Result<Provider, AuthError> {
    raw.parse::<Provider>()
        .map_err(|_| AuthError::BadRequest(Message::UnsupportedProvider))
}

/// Classify a provider adapter failure
///
/// OAuth error codes become BAD_REQUEST categories; transport and parsing
/// failures become INTERNAL with `fallback`.
pub(crate) fn provider_failure(provider: Provider, e: ProviderError, fallback: Message) -> AuthError {
    match e {
        ProviderError::OAuth { error, description } => {
            warn!(
                provider = %provider,
                error = %error,
                description = description.as_deref().unwrap_or(""),
                "Provider rejected OAuth request"
            );
            AuthError::BadRequest(security::map_provider_error(&error))
        }
        ProviderError::NoVerifiedEmail => AuthError::BadRequest(Message::NoVerifiedEmail),
        other => {
            error!(provider = %provider, error = %other, "OAuth provider call failed");
            AuthError::Internal(fallback)
        }
    }
}
