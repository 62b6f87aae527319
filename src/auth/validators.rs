// src/auth/validators.rs

use super::models::{
    CompleteRegistrationRequest, CreateApiKeyRequest, RegisterRequest, API_KEY_SCOPES,
};
use crate::common::i18n::Message;
use crate::common::{ValidationResult, Validator};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 8;
const API_KEY_NAME_MAX_LEN: usize = 100;

// ============================================================================
// Field rules
// ============================================================================

pub fn validate_username(username: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    let username = username.trim();
    let len = username.chars().count();

    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        result.add_error("username", Message::UsernameLength);
    } else if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        result.add_error("username", Message::UsernameCharacters);
    }

    result
}

pub fn validate_email(email: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    let email = email.trim();

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
                && email.len() <= 254
        }
        None => false,
    };

    if !valid {
        result.add_error("email", Message::EmailInvalid);
    }
    result
}

// ============================================================================
// Request validators
// ============================================================================

pub struct RegisterValidator;

impl Validator<RegisterRequest> for RegisterValidator {
    fn validate(&self, data: &RegisterRequest) -> ValidationResult {
        let mut result = validate_email(&data.email);
        result.merge(validate_username(&data.username));

        if data.password.chars().count() < PASSWORD_MIN_LEN {
            result.add_error("password", Message::PasswordTooShort);
        }

        result
    }
}

pub struct CompleteRegistrationValidator;

impl Validator<CompleteRegistrationRequest> for CompleteRegistrationValidator {
    fn validate(&self, data: &CompleteRegistrationRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.temp_token.trim().is_empty() {
            result.add_error("tempToken", Message::InvalidTempToken);
        }
        result.merge(validate_username(&data.username));

        result
    }
}

pub struct CreateApiKeyValidator;

impl Validator<CreateApiKeyRequest> for CreateApiKeyValidator {
    fn validate(&self, data: &CreateApiKeyRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        let name = data.name.trim();
        if name.is_empty() || name.chars().count() > API_KEY_NAME_MAX_LEN {
            result.add_error("name", Message::NameRequired);
        }

        if data.scopes.is_empty()
            || data
                .scopes
                .iter()
                .any(|s| !API_KEY_SCOPES.contains(&s.as_str()))
        {
            result.add_error("scopes", Message::InvalidScope);
        }

        if let Some(days) = data.expires_in_days {
            if !(1..=365).contains(&days) {
                result.add_error("expiresInDays", Message::InvalidExpiry);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("octo_cat-1").is_valid);
        assert!(validate_username("abc").is_valid);
        assert!(validate_username(&"a".repeat(32)).is_valid);

        let short = validate_username("ab");
        assert_eq!(short.errors[0].message, Message::UsernameLength);
        assert!(!validate_username(&"a".repeat(33)).is_valid);

        let bad = validate_username("octo cat");
        assert_eq!(bad.errors[0].message, Message::UsernameCharacters);
        assert!(!validate_username("octo.cat").is_valid);
        assert!(!validate_username("名字名字").is_valid);
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("dev@example.com").is_valid);
        assert!(validate_email(" dev@sub.example.org ").is_valid);

        for bad in ["", "dev", "@example.com", "dev@", "dev@example", "dev@@example.com", "d v@example.com"] {
            assert!(!validate_email(bad).is_valid, "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_register_collects_every_error() {
        let result = RegisterValidator.validate(&RegisterRequest {
            email: "nope".to_string(),
            username: "x".to_string(),
            password: "short".to_string(),
        });
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "username", "password"]);
    }

    #[test]
    fn test_api_key_scopes_must_be_known() {
        let ok = CreateApiKeyValidator.validate(&CreateApiKeyRequest {
            name: "ci".to_string(),
            scopes: vec!["rules:read".to_string()],
            expires_in_days: Some(30),
        });
        assert!(ok.is_valid);

        let bad = CreateApiKeyValidator.validate(&CreateApiKeyRequest {
            name: "ci".to_string(),
            scopes: vec!["admin:everything".to_string()],
            expires_in_days: None,
        });
        assert!(!bad.is_valid);

        let empty = CreateApiKeyValidator.validate(&CreateApiKeyRequest {
            name: "  ".to_string(),
            scopes: vec![],
            expires_in_days: None,
        });
        assert_eq!(empty.errors.len(), 2);
    }
}
