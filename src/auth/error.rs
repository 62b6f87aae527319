//! Typed failures of the auth service
//!
//! Each variant carries its taxonomy class and a [`Message`] key. The HTTP
//! layer renders the key in the caller's locale via [`AuthError::localize`].

use thiserror::Error;
use tracing::error;

use super::models::Provider;
use crate::common::i18n::{Locale, Message};
use crate::common::{ApiError, ValidationResult};
use crate::services::password::HashError;
use crate::services::tokens::TokenError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized: {0:?}")]
    Unauthorized(Message),

    #[error("forbidden: {0:?}")]
    Forbidden(Message),

    #[error("bad request: {0:?}")]
    BadRequest(Message),

    #[error("conflict: {0:?}")]
    Conflict(Message),

    #[error("too many requests: {0:?}")]
    TooManyRequests(Message),

    #[error("not found: {0:?}")]
    NotFound(Message),

    #[error("internal: {0:?}")]
    Internal(Message),

    #[error("validation failed: {0:?}")]
    Validation(ValidationResult),

    #[error("OAuth provider {0} is not configured")]
    ProviderNotConfigured(Provider),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AuthError {
    /// `Ok(())` for a passing validation, otherwise the failure as an error
    pub fn check(result: ValidationResult) -> Result<(), AuthError> {
        if result.is_valid {
            Ok(())
        } else {
            Err(AuthError::Validation(result))
        }
    }

    pub fn localize(self, locale: Locale) -> ApiError {
        match self {
            AuthError::Unauthorized(m) => ApiError::Unauthorized(m.text(locale).to_string()),
            AuthError::Forbidden(m) => ApiError::Forbidden(m.text(locale).to_string()),
            AuthError::BadRequest(m) => ApiError::BadRequest(m.text(locale).to_string()),
            AuthError::Conflict(m) => ApiError::Conflict(m.text(locale).to_string()),
            AuthError::TooManyRequests(m) => ApiError::TooManyRequests(m.text(locale).to_string()),
            AuthError::NotFound(m) => ApiError::NotFound(m.text(locale).to_string()),
            AuthError::Internal(m) => ApiError::InternalServer(m.text(locale).to_string()),
            AuthError::Validation(result) => result.into_api_error(locale),
            AuthError::ProviderNotConfigured(provider) => {
                error!(provider = %provider, "OAuth provider requested but not configured");
                ApiError::InternalServer(Message::ProviderNotConfigured.text(locale).to_string())
            }
            AuthError::Token(e) => {
                error!(error = %e, "Token signing failed");
                ApiError::InternalServer(Message::InternalError.text(locale).to_string())
            }
            AuthError::Hash(e) => {
                error!(error = %e, "Secret hashing failed");
                ApiError::InternalServer(Message::InternalError.text(locale).to_string())
            }
            AuthError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}
