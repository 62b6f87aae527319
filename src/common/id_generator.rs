// src/common/id_generator.rs
//! Identifier and secret generation
//!
//! Entity ids are human-readable, prefixed Crockford Base32 strings
//! (e.g. `U_K7NP3XQ2` for users). Secrets that must be unguessable (OAuth
//! state values, nonces, temp tokens, API keys) come from the OS RNG and are
//! encoded as unpadded base64url.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Random characters in an entity id
const ENTITY_ID_LENGTH: usize = 10;

/// Entity type prefixes for ID generation
#[derive(Debug, Clone, Copy)]
pub enum EntityPrefix {
    /// User (U_)
    User,
    /// OAuth linked account (L_)
    LinkedAccount,
    /// API key (K_) - K for Key
    ApiKey,
}

impl EntityPrefix {
    /// Get the string prefix for this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::User => "U",
            EntityPrefix::LinkedAccount => "L",
            EntityPrefix::ApiKey => "K",
        }
    }
}

/// Generate a random Crockford Base32 string of specified length
fn generate_crockford_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..32);
            CROCKFORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a prefixed ID using Crockford Base32 encoding
///
/// # Example
/// ```
/// let user_id = generate_id(EntityPrefix::User);
/// // Returns something like "U_K7NP3XQ2AB"
/// ```
pub fn generate_id(prefix: EntityPrefix) -> String {
    format!(
        "{}_{}",
        prefix.as_str(),
        generate_crockford_string(ENTITY_ID_LENGTH)
    )
}

/// Generate `bytes` bytes from the OS RNG, base64url-encoded without padding
pub fn generate_secure_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a User ID (U_XXXXXXXXXX)
pub fn generate_user_id() -> String {
    generate_id(EntityPrefix::User)
}

/// Generate a linked account ID (L_XXXXXXXXXX)
pub fn generate_linked_account_id() -> String {
    generate_id(EntityPrefix::LinkedAccount)
}

/// Generate an API key ID (K_XXXXXXXXXX)
pub fn generate_api_key_id() -> String {
    generate_id(EntityPrefix::ApiKey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_format() {
        let user_id = generate_user_id();
        assert!(user_id.starts_with("U_"));
        assert_eq!(user_id.len(), 2 + ENTITY_ID_LENGTH);

        assert!(generate_linked_account_id().starts_with("L_"));
        assert!(generate_api_key_id().starts_with("K_"));
    }

    #[test]
    fn test_crockford_alphabet_only() {
        let id = generate_user_id();
        for c in id[2..].chars() {
            assert!(
                CROCKFORD_ALPHABET.contains(&(c as u8)),
                "Character '{}' not in Crockford alphabet",
                c
            );
        }
    }

    #[test]
    fn test_secure_token_is_url_safe_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let token = generate_secure_token(32);
            // 32 bytes -> 43 base64 chars without padding
            assert_eq!(token.len(), 43);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(token), "Duplicate token generated");
        }
    }
}
