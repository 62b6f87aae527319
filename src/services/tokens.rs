// src/services/tokens.rs
//! Access and refresh token issuance
//!
//! Access tokens carry the caller's profile claims and live for minutes to an
//! hour. Refresh tokens carry only the user id plus a `"type": "refresh"`
//! marker and live for weeks. Verification never reports *why* a token was
//! rejected: every failure collapses into [`TokenVerification::Invalid`].

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::common::config::JwtConfig;

const REFRESH_TOKEN_TYPE: &str = "refresh";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Claims embedded in an access token
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub username: String,
    pub role: String,
    pub email_verified: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Claims embedded in a refresh token
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RefreshClaims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Access tokens must not carry a type marker; decoding goes through this
/// wrapper so a refresh token presented as an access token is caught even if
/// it happened to include profile fields.
#[derive(Deserialize)]
struct AccessPayload {
    #[serde(flatten)]
    claims: AccessClaims,
    #[serde(rename = "type", default)]
    token_type: Option<String>,
}

/// Outcome of verifying a token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenVerification<T> {
    Valid(T),
    Invalid,
}

impl<T> TokenVerification<T> {
    pub fn valid(self) -> Option<T> {
        match self {
            TokenVerification::Valid(claims) => Some(claims),
            TokenVerification::Invalid => None,
        }
    }
}

/// Identity fields an access token is issued for
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub username: &'a str,
    pub role: &'a str,
    pub email_verified: bool,
}

/// A freshly issued access/refresh token pair
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .finish()
    }
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            algorithm: config.algorithm,
            access_ttl_seconds: config.access_ttl_seconds,
            refresh_ttl_seconds: config.refresh_ttl_seconds,
        }
    }

    pub fn issue_access_token(&self, subject: TokenSubject<'_>) -> Result<String, TokenError> {
        self.issue_access_token_at(subject, Utc::now().timestamp())
    }

    pub(crate) fn issue_access_token_at(
        &self,
        subject: TokenSubject<'_>,
        issued_at: i64,
    ) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: subject.id.to_string(),
            email: subject.email.to_string(),
            username: subject.username.to_string(),
            role: subject.role.to_string(),
            email_verified: subject.email_verified,
            iat: issued_at,
            exp: issued_at + self.access_ttl_seconds,
        };
        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    pub fn issue_refresh_token(&self, user_id: &str) -> Result<String, TokenError> {
        self.issue_refresh_token_at(user_id, Utc::now().timestamp())
    }

    pub(crate) fn issue_refresh_token_at(
        &self,
        user_id: &str,
        issued_at: i64,
    ) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: issued_at,
            exp: issued_at + self.refresh_ttl_seconds,
        };
        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    /// Issue both tokens for one subject
    pub fn issue_pair(&self, subject: TokenSubject<'_>) -> Result<TokenPair, TokenError> {
        let access_token = self.issue_access_token(subject).map_err(|e| {
            error!(error = %e, user_id = %subject.id, "Failed to sign access token");
            e
        })?;
        let refresh_token = self.issue_refresh_token(subject.id).map_err(|e| {
            error!(error = %e, user_id = %subject.id, "Failed to sign refresh token");
            e
        })?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    pub fn verify_access_token(&self, token: &str) -> TokenVerification<AccessClaims> {
        match decode::<AccessPayload>(token, &self.decoding_key, &self.validation()) {
            Ok(data) if data.claims.token_type.is_none() => {
                TokenVerification::Valid(data.claims.claims)
            }
            Ok(_) => {
                debug!("Typed token presented as access token");
                TokenVerification::Invalid
            }
            Err(e) => {
                debug!(error = %e, "Access token verification failed");
                TokenVerification::Invalid
            }
        }
    }

    /// Verify a refresh token and return the user id it was issued to
    pub fn verify_refresh_token(&self, token: &str) -> TokenVerification<String> {
        match decode::<RefreshClaims>(token, &self.decoding_key, &self.validation()) {
            Ok(data) if data.claims.token_type == REFRESH_TOKEN_TYPE => {
                TokenVerification::Valid(data.claims.sub)
            }
            Ok(_) => {
                debug!("Token without refresh marker presented as refresh token");
                TokenVerification::Invalid
            }
            Err(e) => {
                debug!(error = %e, "Refresh token verification failed");
                TokenVerification::Invalid
            }
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&JwtConfig {
            secret: "test_secret_key".to_string(),
            ..JwtConfig::default()
        })
    }

    fn subject() -> TokenSubject<'static> {
        TokenSubject {
            id: "U_TEST000001",
            email: "dev@example.com",
            username: "dev",
            role: "user",
            email_verified: true,
        }
    }

    #[test]
    fn test_access_token_round_trip_claims() {
        let service = service();
        let token = service.issue_access_token(subject()).unwrap();

        let claims = service
            .verify_access_token(&token)
            .valid()
            .expect("access token should verify");
        assert_eq!(claims.sub, "U_TEST000001");
        assert_eq!(claims.username, "dev");
        assert!(claims.email_verified);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_refresh_token_rejected_as_access_token() {
        let service = service();
        let refresh = service.issue_refresh_token("U_TEST000001").unwrap();

        assert_eq!(service.verify_access_token(&refresh), TokenVerification::Invalid);
        assert_eq!(
            service.verify_refresh_token(&refresh),
            TokenVerification::Valid("U_TEST000001".to_string())
        );
    }

    #[test]
    fn test_access_token_rejected_as_refresh_token() {
        let service = service();
        let access = service.issue_access_token(subject()).unwrap();

        assert!(matches!(
            service.verify_access_token(&access),
            TokenVerification::Valid(_)
        ));
        assert_eq!(service.verify_refresh_token(&access), TokenVerification::Invalid);
    }

    #[test]
    fn test_refresh_token_with_wrong_marker_rejected() {
        let service = service();
        let now = Utc::now().timestamp();
        let forged = RefreshClaims {
            sub: "U_TEST000001".to_string(),
            token_type: "access".to_string(),
            jti: "x".to_string(),
            iat: now,
            exp: now + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &forged,
            &EncodingKey::from_secret(b"test_secret_key"),
        )
        .unwrap();

        assert_eq!(service.verify_refresh_token(&token), TokenVerification::Invalid);
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let service = service();
        let long_ago = Utc::now().timestamp() - 10 * 3600;
        let token = service.issue_access_token_at(subject(), long_ago).unwrap();
        assert_eq!(service.verify_access_token(&token), TokenVerification::Invalid);

        let refresh = service
            .issue_refresh_token_at("U_TEST000001", long_ago - 31 * 24 * 3600)
            .unwrap();
        assert_eq!(service.verify_refresh_token(&refresh), TokenVerification::Invalid);
    }

    #[test]
    fn test_wrong_secret_and_garbage_are_invalid() {
        let token = service().issue_access_token(subject()).unwrap();
        let other = TokenService::new(&JwtConfig {
            secret: "wrong_secret_key".to_string(),
            ..JwtConfig::default()
        });

        assert_eq!(other.verify_access_token(&token), TokenVerification::Invalid);
        assert_eq!(service().verify_access_token("not-a-jwt"), TokenVerification::Invalid);
        assert_eq!(service().verify_refresh_token(""), TokenVerification::Invalid);
    }

    #[test]
    fn test_refresh_tokens_are_distinct() {
        let service = service();
        let a = service.issue_refresh_token("U_TEST000001").unwrap();
        let b = service.issue_refresh_token("U_TEST000001").unwrap();
        assert_ne!(a, b);
    }
}
