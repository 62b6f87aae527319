//! Authentication handlers

use axum::extract::{Extension, Json, Path, Query};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info};

use super::device::DevicePollOutcome;
use super::error::AuthError;
use super::extractors::{AuthContext, AuthedUser};
use super::models::*;
use super::state_store::SweepReport;
use crate::common::i18n::{Locale, Message};
use crate::common::{now_ts, ApiError, AppState};

/// POST /api/auth/refresh
///
/// Exchanges a refresh token for a new token pair.
///
/// # Request Body
/// ```json
/// { "refreshToken": "<jwt>" }
/// ```
pub async fn refresh_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    state
        .auth_service
        .refresh(&payload.refresh_token)
        .await
        .map(Json)
        .map_err(|e| e.localize(locale))
}

/// POST /api/auth/logout
///
/// Tokens are not stored server-side, so the client discards them; this only
/// checks the refresh token.
pub async fn logout_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, ApiError> {
    state
        .auth_service
        .logout(&payload.refresh_token)
        .await
        .map_err(|e| e.localize(locale))?;

    Ok(Json(LogoutResponse {
        success: true,
        message: Message::LogoutSuccess.text(locale).to_string(),
    }))
}

/// POST /api/auth/login
pub async fn login_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    state
        .auth_service
        .login(&payload.email, &payload.password)
        .await
        .map(Json)
        .map_err(|e| e.localize(locale))
}

/// POST /api/auth/register
pub async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let response = state
        .auth_service
        .register(&payload)
        .await
        .map_err(|e| e.localize(locale))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/oauth/initialize
///
/// # Request Body
/// ```json
/// { "provider": "github", "redirectUrl": "/rules", "action": "login" }
/// ```
///
/// # Response
/// ```json
/// { "authorizationUrl": "https://github.com/login/oauth/authorize?..." }
/// ```
pub async fn oauth_initialize_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    client: ClientInfo,
    Json(payload): Json<OAuthInitializeRequest>,
) -> Result<Json<OAuthInitializeResponse>, ApiError> {
    state
        .auth_service
        .initialize_oauth(&payload, &client)
        .await
        .map(Json)
        .map_err(|e| e.localize(locale))
}

/// POST /api/auth/oauth/callback
///
/// Returns either tokens (plus the stored `redirectUrl`) or
/// `{ tempToken, provider, requiresUsername: true }`.
pub async fn oauth_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    client: ClientInfo,
    Json(payload): Json<OAuthCallbackRequest>,
) -> Result<Json<AuthOutcome>, ApiError> {
    state
        .auth_service
        .oauth_callback(&payload, &client)
        .await
        .map(Json)
        .map_err(|e| e.localize(locale))
}

/// POST /api/auth/oauth/device/initialize
pub async fn device_initialize_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    client: ClientInfo,
    Json(payload): Json<DeviceInitializeRequest>,
) -> Result<Json<DeviceInitializeResponse>, ApiError> {
    state
        .auth_service
        .initialize_device(&payload, &client)
        .await
        .map(Json)
        .map_err(|e| e.localize(locale))
}

/// POST /api/auth/oauth/device/callback
///
/// Pending, slow-down, denied and expired are normal 200 responses of the
/// form `{ "error": "authorization_pending", "error_description": "..." }`.
pub async fn device_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    client: ClientInfo,
    Json(payload): Json<DeviceCallbackRequest>,
) -> Result<Json<DeviceCallbackResponse>, ApiError> {
    let outcome = state
        .auth_service
        .poll_device(&payload.device_code, &client)
        .await
        .map_err(|e| e.localize(locale))?;

    Ok(Json(device_response(outcome, locale)))
}

fn device_response(outcome: DevicePollOutcome, locale: Locale) -> DeviceCallbackResponse {
    let (error, message) = match outcome {
        DevicePollOutcome::Completed(auth) => return DeviceCallbackResponse::Completed(auth),
        DevicePollOutcome::Pending => ("authorization_pending", Message::AuthorizationPending),
        DevicePollOutcome::SlowDown => ("slow_down", Message::SlowDown),
        DevicePollOutcome::Denied => ("access_denied", Message::DeviceAccessDenied),
        DevicePollOutcome::Expired => ("expired_token", Message::DeviceCodeExpired),
    };

    debug!(status = %error, "Device poll returned soft outcome");
    DeviceCallbackResponse::Status(DevicePollStatus {
        error,
        error_description: message.text(locale).to_string(),
    })
}

/// GET /api/auth/check-username?username=
pub async fn check_username_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    Query(query): Query<CheckUsernameQuery>,
) -> Result<Json<CheckUsernameResponse>, ApiError> {
    let available = state
        .auth_service
        .check_username(&query.username)
        .await
        .map_err(|e| e.localize(locale))?;
    Ok(Json(CheckUsernameResponse { available }))
}

/// POST /api/auth/oauth/complete-registration
pub async fn complete_registration_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    Json(payload): Json<CompleteRegistrationRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let response = state
        .auth_service
        .complete_registration(&payload)
        .await
        .map_err(|e| e.localize(locale))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/me
pub async fn me_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    AuthedUser(identity): AuthedUser,
) -> Result<Json<AuthUser>, ApiError> {
    state
        .auth_service
        .current_user(&identity)
        .await
        .map(Json)
        .map_err(|e| e.localize(locale))
}

/// POST /api/auth/api-keys
///
/// Only browser sessions of verified accounts may mint keys; a key cannot
/// create more keys.
pub async fn create_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    context: AuthContext,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ApiError> {
    let identity = context
        .require_verified_email()
        .map_err(|e| e.localize(locale))?;
    if identity.method != AuthMethod::Jwt {
        return Err(AuthError::Forbidden(Message::InsufficientScope).localize(locale));
    }

    let response = state
        .auth_service
        .create_api_key(&identity.user_id, &payload)
        .await
        .map_err(|e| e.localize(locale))?;

    info!(user_id = %identity.user_id, username = %identity.username, "Issued API key");
    Ok((StatusCode::CREATED, Json(response)))
}

/// DELETE /api/auth/api-keys/:id
pub async fn revoke_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    context: AuthContext,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = context
        .require_scope("profile:write")
        .map_err(|e| e.localize(locale))?;

    state
        .auth_service
        .revoke_api_key(&identity.user_id, &key_id)
        .await
        .map_err(|e| e.localize(locale))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/oauth/sweep
///
/// Removes expired OAuth states, device codes and pending registrations
/// right away instead of waiting for the background sweeper.
pub async fn sweep_oauth_handler(
    Extension(state): Extension<Arc<AppState>>,
    locale: Locale,
    context: AuthContext,
) -> Result<Json<SweepReport>, ApiError> {
    let identity = context
        .require_role(Role::Admin)
        .map_err(|e| e.localize(locale))?;

    let report = state
        .auth_service
        .state_store()
        .sweep_expired(now_ts())
        .await
        .map_err(|e| AuthError::from(e).localize(locale))?;

    info!(
        username = %identity.username,
        removed = report.total(),
        "Manual OAuth expiry sweep"
    );
    Ok(Json(report))
}
