// src/auth/security.rs
//! Abuse guards and input checks for the OAuth flows

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::error::AuthError;
use super::models::OAuthAction;
use super::state_store::OAuthStateStore;
use crate::common::i18n::Message;
use crate::common::{generate_secure_token, now_ts};

/// Accepted length range of `code` and `state` on a callback
pub const CALLBACK_PARAM_MIN_LEN: usize = 10;
pub const CALLBACK_PARAM_MAX_LEN: usize = 1024;

/// Probability that a flow initiation also sweeps expired records
const OPPORTUNISTIC_SWEEP_PROBABILITY: f64 = 0.1;

/// Reject the request if `client_ip` already holds the maximum number of
/// unexpired states
pub async fn check_state_abuse(
    store: &OAuthStateStore,
    client_ip: Option<&str>,
    max_pending: i64,
) -> Result<(), AuthError> {
    let Some(ip) = client_ip else {
        return Ok(());
    };

    let pending = store.count_pending_states_for_ip(ip, now_ts()).await?;
    if pending >= max_pending {
        warn!(client_ip = %ip, pending = pending, "Too many pending OAuth states for client");
        return Err(AuthError::TooManyRequests(Message::TooManyPendingStates));
    }
    Ok(())
}

/// Both parameters must be present and 10..=1024 characters long
pub fn validate_callback_params<'a>(
    code: Option<&'a str>,
    state: Option<&'a str>,
) -> Result<(&'a str, &'a str), AuthError> {
    let in_bounds = |value: &str| {
        let len = value.chars().count();
        (CALLBACK_PARAM_MIN_LEN..=CALLBACK_PARAM_MAX_LEN).contains(&len)
    };

    match (code, state) {
        (Some(code), Some(state)) if in_bounds(code) && in_bounds(state) => Ok((code, state)),
        _ => Err(AuthError::BadRequest(Message::InvalidCallbackParams)),
    }
}

/// Normalize the post-login redirect target
///
/// Accepts a relative path (`/x`, not `//x`) or an absolute URL on the
/// frontend's origin. `None` becomes `/`.
pub fn validate_redirect_url(
    redirect_url: Option<&str>,
    frontend_url: &str,
) -> Result<String, AuthError> {
    let raw = match redirect_url.map(str::trim) {
        None | Some("") => return Ok("/".to_string()),
        Some(raw) => raw,
    };

    if raw.starts_with('/') && !raw.starts_with("//") && !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let target = Url::parse(raw).map_err(|_| AuthError::BadRequest(Message::InvalidRedirectUrl))?;
    let frontend =
        Url::parse(frontend_url).map_err(|_| AuthError::BadRequest(Message::InvalidRedirectUrl))?;

    if target.origin() == frontend.origin() {
        Ok(target.to_string())
    } else {
        warn!(origin = %target.origin().ascii_serialization(), "Rejected off-site OAuth redirect target");
        Err(AuthError::BadRequest(Message::InvalidRedirectUrl))
    }
}

/// Log when the callback arrives from a different address than the one that
/// initiated the flow; never blocks
pub fn log_ip_mismatch(initiated_from: Option<&str>, callback_from: Option<&str>) -> bool {
    match (initiated_from, callback_from) {
        (Some(initiated), Some(callback)) if initiated != callback => {
            warn!(
                initiated_ip = %initiated,
                callback_ip = %callback,
                "OAuth callback IP differs from initiating IP"
            );
            true
        }
        _ => false,
    }
}

/// Sweep expired OAuth records in the background with probability 0.1
pub fn maybe_sweep(store: &OAuthStateStore) {
    if !rand::thread_rng().gen_bool(OPPORTUNISTIC_SWEEP_PROBABILITY) {
        return;
    }
    let store = store.clone();
    tokio::spawn(async move {
        if let Err(e) = store.sweep_expired(now_ts()).await {
            debug!(error = %e, "Opportunistic OAuth sweep failed");
        }
    });
}

/// Map an OAuth error code (RFC 6749 section 4.1.2.1) onto a user-facing category
pub fn map_provider_error(code: &str) -> Message {
    match code {
        "access_denied" => Message::ProviderAccessDenied,
        "invalid_request" | "unauthorized_client" | "unsupported_response_type"
        | "invalid_scope" | "redirect_uri_mismatch" | "bad_verification_code"
        | "incorrect_client_credentials" => Message::ProviderInvalidRequest,
        "server_error" | "temporarily_unavailable" => Message::ProviderUnavailable,
        _ => Message::ProviderFailure,
    }
}

// ============================================================================
// State payload
// ============================================================================

/// What travels through the provider in the `state` parameter
///
/// `s` keys the stored row; `a` carries the intended action across the round
/// trip; `n` must match the nonce stored with the row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatePayload {
    #[serde(rename = "s")]
    pub key: String,
    #[serde(rename = "a")]
    pub action: OAuthAction,
    #[serde(rename = "n")]
    pub nonce: String,
}

impl StatePayload {
    pub fn generate(action: OAuthAction) -> Self {
        Self {
            key: generate_secure_token(32),
            action,
            nonce: generate_secure_token(16),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing two strings and a unit enum cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// `None` for anything that is not a payload this service produced
    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw.as_bytes()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
