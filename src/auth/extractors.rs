//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Extension, FromRequestParts},
    http::{header::AUTHORIZATION, header::USER_AGENT, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use super::error::AuthError;
use super::models::{AuthIdentity, ClientInfo, Role};
use crate::common::i18n::{Locale, Message};
use crate::common::{ApiError, AppState};

const API_KEY_HEADER: &str = "x-api-key";

/// Extract the client IP from proxy headers, falling back to the socket peer
fn extract_ip_address(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    // X-Forwarded-For first; the left-most entry is the original client
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.trim().to_string());
        }
    }

    connect_info.map(|info| info.0.ip().to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let connect_info = parts.extensions.get::<ConnectInfo<SocketAddr>>();
        Ok(ClientInfo {
            ip: extract_ip_address(&parts.headers, connect_info),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        })
    }
}

/// Credential presented by the request, if any
///
/// `X-API-Key` wins over `Authorization`; a bare `Authorization` value
/// without the `Bearer ` prefix is accepted too.
fn presented_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok()) {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let bare = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!bare.is_empty()).then(|| bare.to_string())
}

/// Per-request authentication context
///
/// Extraction never fails for a missing or invalid credential; the context is
/// simply anonymous. Handlers call the guards to demand more.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub identity: Option<AuthIdentity>,
}

impl AuthContext {
    pub fn require_user(&self) -> Result<&AuthIdentity, AuthError> {
        self.identity
            .as_ref()
            .ok_or(AuthError::Unauthorized(Message::AuthenticationRequired))
    }

    pub fn require_scope(&self, scope: &str) -> Result<&AuthIdentity, AuthError> {
        let identity = self.require_user()?;
        if identity.has_scope(scope) {
            Ok(identity)
        } else {
            debug!(
                user_id = %identity.user_id,
                username = %identity.username,
                scope = %scope,
                "Missing scope"
            );
            Err(AuthError::Forbidden(Message::InsufficientScope))
        }
    }

    pub fn require_role(&self, role: Role) -> Result<&AuthIdentity, AuthError> {
        let identity = self.require_user()?;
        // Admins satisfy every role check
        if identity.role == role || identity.role == Role::Admin {
            Ok(identity)
        } else {
            debug!(username = %identity.username, role = %role.as_str(), "Missing role");
            Err(AuthError::Forbidden(Message::InsufficientRole))
        }
    }

    pub fn require_verified_email(&self) -> Result<&AuthIdentity, AuthError> {
        let identity = self.require_user()?;
        if identity.email_verified {
            Ok(identity)
        } else {
            Err(AuthError::Forbidden(Message::EmailNotVerified))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let Some(credential) = presented_credential(&parts.headers) else {
            return Ok(AuthContext::default());
        };

        match app_state.auth_service.authenticate(&credential).await {
            Ok(identity) => {
                match &identity {
                    Some(caller) => debug!(username = %caller.username, "Authenticated request"),
                    None => debug!("Presented credential did not authenticate"),
                }
                Ok(AuthContext { identity })
            }
            Err(e) => {
                error!(error = %e, "Credential lookup failed");
                let locale = Locale::from_request_parts(parts, state)
                    .await
                    .unwrap_or_default();
                Err(e.localize(locale))
            }
        }
    }
}

/// Extractor for handlers that require an authenticated caller
#[derive(Debug)]
pub struct AuthedUser(pub AuthIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = AuthContext::from_request_parts(parts, state).await?;
        let locale = Locale::from_request_parts(parts, state)
            .await
            .unwrap_or_default();

        match context.identity {
            Some(identity) => Ok(AuthedUser(identity)),
            None => Err(AuthError::Unauthorized(Message::AuthenticationRequired).localize(locale)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::AuthMethod;
    use axum::http::HeaderValue;

    fn identity(method: AuthMethod, role: Role, verified: bool) -> AuthIdentity {
        AuthIdentity {
            user_id: "U_TEST".to_string(),
            username: "dev".to_string(),
            role,
            email_verified: verified,
            method,
            scopes: vec!["rules:read".to_string()],
        }
    }

    #[test]
    fn test_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_ip_address(&headers, None).as_deref(), Some("203.0.113.7"));

        headers.remove("x-forwarded-for");
        assert_eq!(extract_ip_address(&headers, None).as_deref(), Some("10.0.0.2"));

        let peer = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
        assert_eq!(
            extract_ip_address(&HeaderMap::new(), Some(&peer)).as_deref(),
            Some("192.0.2.1")
        );
    }

    #[test]
    fn test_presented_credential() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_credential(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(presented_credential(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("rk_secret"));
        assert_eq!(presented_credential(&headers).as_deref(), Some("rk_secret"));
    }

    #[test]
    fn test_guards_distinguish_unauthenticated_from_forbidden() {
        let anonymous = AuthContext::default();
        assert!(matches!(anonymous.require_user(), Err(AuthError::Unauthorized(_))));
        assert!(matches!(
            anonymous.require_scope("rules:read"),
            Err(AuthError::Unauthorized(_))
        ));

        let api_key = AuthContext {
            identity: Some(identity(
                AuthMethod::ApiKey { key_id: "K_1".to_string() },
                Role::User,
                false,
            )),
        };
        assert!(api_key.require_scope("rules:read").is_ok());
        assert!(matches!(
            api_key.require_scope("rules:write"),
            Err(AuthError::Forbidden(Message::InsufficientScope))
        ));
        assert!(matches!(
            api_key.require_role(Role::Admin),
            Err(AuthError::Forbidden(Message::InsufficientRole))
        ));
        assert!(matches!(
            api_key.require_verified_email(),
            Err(AuthError::Forbidden(Message::EmailNotVerified))
        ));

        let session = AuthContext {
            identity: Some(identity(AuthMethod::Jwt, Role::Admin, true)),
        };
        assert!(session.require_scope("profile:write").is_ok());
        assert!(session.require_role(Role::User).is_ok());
        assert!(session.require_verified_email().is_ok());
    }
}
