// src/services/mod.rs
//
// Services shared by the auth module: token signing, secret hashing and
// OAuth provider adapters

pub mod github;
pub mod oauth_provider;
pub mod password;
pub mod tokens;

// Re-export commonly used types for convenience
pub use github::GitHubProvider;
pub use oauth_provider::ProviderRegistry;
