// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::error;

use super::i18n::Locale;
use super::validation::ValidationResult;

/// API error types
///
/// Messages are already localized when an `ApiError` is built.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    Conflict(String),
    TooManyRequests(String),
    NotFound(String),
    InternalServer(String),
    DatabaseError(sqlx::Error),
    ValidationError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::TooManyRequests(msg) => write!(f, "Too Many Requests: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(e) => write!(f, "Database Error: {}", e),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl ApiError {
    /// Status and machine-readable code sent to clients.
    ///
    /// Codes are the taxonomy class names; database and validation failures
    /// fold into `INTERNAL` and `BAD_REQUEST`.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::TooManyRequests(_) => (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::InternalServer(_) | ApiError::DatabaseError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
            ApiError::ValidationError(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let error_message = match self {
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::TooManyRequests(msg)
            | ApiError::NotFound(msg)
            | ApiError::InternalServer(msg)
            | ApiError::ValidationError(msg) => msg,
            ApiError::DatabaseError(e) => {
                error!(error = %e, "Database error occurred");
                "Database operation failed".to_string()
            }
        };

        let error_response = ErrorResponse {
            error: error_message,
            code: code.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl ValidationResult {
    /// Convert a failed validation into a localized `ApiError`
    pub fn into_api_error(self, locale: Locale) -> ApiError {
        if self.is_valid {
            return ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            );
        }
        let error_messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message.text(locale)))
            .collect();
        ApiError::ValidationError(error_messages.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::i18n::Message;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            ApiError::TooManyRequests("x".into()).status_and_code(),
            (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS")
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_and_code(),
            (StatusCode::CONFLICT, "CONFLICT")
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_every_code_is_a_taxonomy_class() {
        let taxonomy = [
            "UNAUTHORIZED",
            "FORBIDDEN",
            "BAD_REQUEST",
            "CONFLICT",
            "TOO_MANY_REQUESTS",
            "NOT_FOUND",
            "INTERNAL",
        ];
        let errors = vec![
            ApiError::Unauthorized("x".into()),
            ApiError::Forbidden("x".into()),
            ApiError::BadRequest("x".into()),
            ApiError::Conflict("x".into()),
            ApiError::TooManyRequests("x".into()),
            ApiError::NotFound("x".into()),
            ApiError::InternalServer("x".into()),
            ApiError::DatabaseError(sqlx::Error::RowNotFound),
            ApiError::ValidationError("x".into()),
        ];
        for error in errors {
            let (_, code) = error.status_and_code();
            assert!(taxonomy.contains(&code), "unexpected code {}", code);
        }

        assert_eq!(
            ApiError::DatabaseError(sqlx::Error::PoolTimedOut).status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        );
        assert_eq!(
            ApiError::ValidationError("x".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "BAD_REQUEST")
        );
    }

    #[test]
    fn test_validation_result_is_localized() {
        let mut result = ValidationResult::new();
        result.add_error("username", Message::UsernameLength);

        match result.into_api_error(Locale::Zh) {
            ApiError::ValidationError(msg) => {
                assert!(msg.starts_with("username: "));
                assert!(msg.contains(Message::UsernameLength.text(Locale::Zh)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
