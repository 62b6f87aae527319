// src/common/config.rs
//! Environment-driven configuration

use jsonwebtoken::Algorithm;
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

const DEV_JWT_SECRET: &str = "replace_with_strong_secret";

/// Top-level configuration assembled at start-up
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub jwt: JwtConfig,
    pub oauth: OAuthConfig,
    pub github: Option<GitHubConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://rules_api.db".to_string());
        let port = env_parse("PORT", 8080u16);
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            database_url,
            port,
            cors_origins,
            jwt: JwtConfig::from_env(),
            oauth: OAuthConfig::from_env(),
            github: GitHubConfig::from_env(),
        }
    }
}

/// Signing configuration for access and refresh tokens
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEV_JWT_SECRET.to_string(),
            algorithm: Algorithm::HS256,
            access_ttl_seconds: 60 * 60,
            refresh_ttl_seconds: 30 * 24 * 60 * 60,
        }
    }
}

impl JwtConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.secret = secret,
            _ => warn!("JWT_SECRET not set, using development secret"),
        }

        // Only HMAC algorithms are supported since the secret is symmetric
        if let Ok(alg) = env::var("JWT_ALGORITHM") {
            match alg.to_uppercase().as_str() {
                "HS256" => config.algorithm = Algorithm::HS256,
                "HS384" => config.algorithm = Algorithm::HS384,
                "HS512" => config.algorithm = Algorithm::HS512,
                other => warn!(algorithm = %other, "Unsupported JWT_ALGORITHM, using HS256"),
            }
        }

        config.access_ttl_seconds = env_parse("ACCESS_TOKEN_TTL_SECONDS", config.access_ttl_seconds);
        config.refresh_ttl_seconds =
            env_parse("REFRESH_TOKEN_TTL_SECONDS", config.refresh_ttl_seconds);

        config
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .finish()
    }
}

/// Limits and lifetimes of the OAuth flows
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub frontend_url: String,
    pub state_ttl_seconds: i64,
    pub max_pending_states_per_ip: i64,
    pub device_max_attempts: i64,
    pub pending_registration_ttl_seconds: i64,
    pub sweep_interval_seconds: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:3000".to_string(),
            state_ttl_seconds: 10 * 60,
            max_pending_states_per_ip: 5,
            device_max_attempts: 50,
            pending_registration_ttl_seconds: 60 * 60,
            sweep_interval_seconds: 5 * 60,
        }
    }
}

impl OAuthConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("FRONTEND_URL") {
            config.frontend_url = url.trim_end_matches('/').to_string();
        }
        config.state_ttl_seconds = env_parse("OAUTH_STATE_TTL_SECONDS", config.state_ttl_seconds);
        config.max_pending_states_per_ip = env_parse(
            "OAUTH_MAX_PENDING_STATES_PER_IP",
            config.max_pending_states_per_ip,
        );
        config.device_max_attempts =
            env_parse("OAUTH_DEVICE_MAX_ATTEMPTS", config.device_max_attempts);
        config.pending_registration_ttl_seconds = env_parse(
            "OAUTH_PENDING_REGISTRATION_TTL_SECONDS",
            config.pending_registration_ttl_seconds,
        );
        config.sweep_interval_seconds =
            env_parse("OAUTH_SWEEP_INTERVAL_SECONDS", config.sweep_interval_seconds);

        config
    }

    /// Callback URL registered with a provider
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}/auth/callback/{}", self.frontend_url, provider)
    }
}

/// GitHub OAuth application credentials
#[derive(Clone)]
pub struct GitHubConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl GitHubConfig {
    /// Returns `None` unless both the client id and secret are set
    pub fn from_env() -> Option<Self> {
        let client_id = env::var("GITHUB_CLIENT_ID").ok().filter(|v| !v.is_empty());
        let client_secret = env::var("GITHUB_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.is_empty());

        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Some(Self {
                client_id,
                client_secret,
            }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("GitHub OAuth is partially configured; both GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET are required");
                None
            }
            (None, None) => None,
        }
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// missing or malformed
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(val) => val,
            Err(_) => {
                warn!(key = %key, value = %raw, "Invalid value in environment, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_defaults() {
        let config = OAuthConfig::default();
        assert_eq!(config.state_ttl_seconds, 600);
        assert_eq!(config.max_pending_states_per_ip, 5);
        assert_eq!(config.device_max_attempts, 50);
        assert_eq!(config.pending_registration_ttl_seconds, 3600);
    }

    #[test]
    fn test_callback_url() {
        let config = OAuthConfig {
            frontend_url: "https://rules.example.com".to_string(),
            ..OAuthConfig::default()
        };
        assert_eq!(
            config.callback_url("github"),
            "https://rules.example.com/auth/callback/github"
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let jwt = JwtConfig {
            secret: "super-secret".to_string(),
            ..JwtConfig::default()
        };
        assert!(!format!("{:?}", jwt).contains("super-secret"));

        let github = GitHubConfig {
            client_id: "id".to_string(),
            client_secret: "gh-secret".to_string(),
        };
        assert!(!format!("{:?}", github).contains("gh-secret"));
    }
}
