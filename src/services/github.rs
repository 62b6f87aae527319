// src/services/github.rs
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::models::Provider;
use crate::common::config::GitHubConfig;
use crate::services::oauth_provider::{
    DeviceAuthorization, DeviceTokenPoll, OAuthProvider, ProviderError, ProviderProfile,
};

const DEFAULT_SCOPES: &str = "read:user user:email";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CLIENT_USER_AGENT: &str = "rules-api";

/// Base URLs of the GitHub endpoints; overridable for tests
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    pub web_base: String,
    pub api_base: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            web_base: "https://github.com".to_string(),
            api_base: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: Option<String>,
    expires_in: i64,
    #[serde(default = "default_interval")]
    interval: i64,
}

fn default_interval() -> i64 {
    5
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Clone)]
pub struct GitHubProvider {
    config: GitHubConfig,
    endpoints: GitHubEndpoints,
    client: Client,
}

impl GitHubProvider {
    pub fn new(config: GitHubConfig) -> Self {
        Self::with_endpoints(config, GitHubEndpoints::default())
    }

    pub fn with_endpoints(config: GitHubConfig, endpoints: GitHubEndpoints) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config,
            endpoints,
            client,
        }
    }

    fn token_url(&self) -> String {
        format!("{}/login/oauth/access_token", self.endpoints.web_base)
    }

    /// POST a form to the token endpoint and split success from OAuth errors
    ///
    /// GitHub reports OAuth errors with HTTP 200, so the body decides.
    async fn post_token_form(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenEndpointResponse, ProviderError> {
        let response = self
            .client
            .post(self.token_url())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<TokenEndpointResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => {
                error!(status = %status, "GitHub token endpoint returned an error status");
                Err(ProviderError::RequestFailed(format!("HTTP {}", status)))
            }
            Err(e) => Err(ProviderError::UnexpectedResponse(e.to_string())),
        }
    }

    async fn get_api<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.endpoints.api_base, path))
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, path = %path, error = %error_text, "GitHub API request failed");
            return Err(ProviderError::RequestFailed(format!("HTTP {}", status)));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        let base = format!("{}/login/oauth/authorize", self.endpoints.web_base);
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", DEFAULT_SCOPES),
            ("state", state),
            ("allow_signup", "true"),
        ];

        match Url::parse_with_params(&base, &params) {
            Ok(url) => url.to_string(),
            Err(_) => {
                let query = params
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{}?{}", base, query)
            }
        }
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, ProviderError> {
        debug!("Exchanging GitHub authorization code");

        let response = self
            .post_token_form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        match response {
            TokenEndpointResponse {
                access_token: Some(token),
                ..
            } => Ok(token),
            TokenEndpointResponse {
                error: Some(error),
                error_description,
                ..
            } => {
                warn!(error = %error, "GitHub rejected authorization code");
                Err(ProviderError::OAuth {
                    error,
                    description: error_description,
                })
            }
            _ => Err(ProviderError::UnexpectedResponse(
                "token response without access_token".to_string(),
            )),
        }
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let user: GitHubUser = self.get_api("/user", access_token).await?;
        let emails: Vec<GitHubEmail> = self.get_api("/user/emails", access_token).await?;

        let email = emails
            .iter()
            .find(|e| e.primary && e.verified)
            .or_else(|| emails.iter().find(|e| e.verified))
            .map(|e| e.email.to_lowercase())
            .ok_or(ProviderError::NoVerifiedEmail)?;

        debug!(github_id = user.id, "Fetched GitHub profile");

        Ok(ProviderProfile {
            id: user.id.to_string(),
            email,
            username: Some(user.login),
            display_name: user.name,
        })
    }

    async fn request_device_code(
        &self,
        scopes: &[String],
    ) -> Result<DeviceAuthorization, ProviderError> {
        let scope = if scopes.is_empty() {
            DEFAULT_SCOPES.to_string()
        } else {
            scopes.join(" ")
        };

        let response = self
            .client
            .post(format!("{}/login/device/code", self.endpoints.web_base))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .form(&[("client_id", self.config.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "GitHub device code request failed");
            return Err(ProviderError::RequestFailed(format!("HTTP {}", status)));
        }

        let body = response.text().await?;
        if let Ok(TokenEndpointResponse {
            error: Some(error),
            error_description,
            ..
        }) = serde_json::from_str::<TokenEndpointResponse>(&body)
        {
            return Err(ProviderError::OAuth {
                error,
                description: error_description,
            });
        }

        let device: DeviceCodeResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))?;

        info!(expires_in = device.expires_in, interval = device.interval, "GitHub device code issued");

        Ok(DeviceAuthorization {
            device_code: device.device_code,
            user_code: device.user_code,
            verification_uri: device.verification_uri,
            verification_uri_complete: device.verification_uri_complete,
            expires_in: device.expires_in,
            interval: device.interval,
        })
    }

    async fn poll_device_token(&self, device_code: &str) -> Result<DeviceTokenPoll, ProviderError> {
        let response = self
            .post_token_form(&[
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", DEVICE_GRANT_TYPE),
            ])
            .await?;

        if let Some(token) = response.access_token {
            return Ok(DeviceTokenPoll::Granted(token));
        }

        match response.error.as_deref() {
            Some("authorization_pending") => Ok(DeviceTokenPoll::Pending),
            Some("slow_down") => Ok(DeviceTokenPoll::SlowDown),
            Some("access_denied") => Ok(DeviceTokenPoll::AccessDenied),
            Some("expired_token") => Ok(DeviceTokenPoll::Expired),
            Some(other) => Err(ProviderError::OAuth {
                error: other.to_string(),
                description: response.error_description,
            }),
            None => Err(ProviderError::UnexpectedResponse(
                "token response without access_token or error".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_for(server: &MockServer) -> GitHubProvider {
        GitHubProvider::with_endpoints(
            GitHubConfig {
                client_id: "client-123".to_string(),
                client_secret: "secret-456".to_string(),
            },
            GitHubEndpoints {
                web_base: server.uri(),
                api_base: server.uri(),
            },
        )
    }

    #[test]
    fn test_authorization_url_carries_state() {
        let github = GitHubProvider::new(GitHubConfig {
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
        });
        let url = github.authorization_url("state-value_1", "http://localhost:3000/auth/callback/github");
        let parsed = Url::parse(&url).unwrap();

        assert_eq!(parsed.host_str(), Some("github.com"));
        assert_eq!(parsed.path(), "/login/oauth/authorize");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("state").map(String::as_str), Some("state-value_1"));
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("client-123"));
        assert_eq!(
            pairs.get("redirect_uri").map(String::as_str),
            Some("http://localhost:3000/auth/callback/github")
        );
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "gho_abc",
                "token_type": "bearer",
                "scope": "read:user,user:email"
            })))
            .mount(&server)
            .await;

        let github = provider_for(&server).await;
        let token = github.exchange_code("the-code", "http://cb").await.unwrap();
        assert_eq!(token, "gho_abc");
    }

    #[tokio::test]
    async fn test_exchange_code_oauth_error_in_200_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&server)
            .await;

        let github = provider_for(&server).await;
        match github.exchange_code("stale", "http://cb").await {
            Err(ProviderError::OAuth { error, .. }) => assert_eq!(error, "bad_verification_code"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_profile_prefers_primary_verified_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer gho_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 583231,
                "login": "octocat",
                "name": "The Octocat"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"email": "old@example.com", "primary": false, "verified": true},
                {"email": "Octo@Example.com", "primary": true, "verified": true},
                {"email": "spam@example.com", "primary": false, "verified": false}
            ])))
            .mount(&server)
            .await;

        let github = provider_for(&server).await;
        let profile = github.fetch_profile("gho_abc").await.unwrap();
        assert_eq!(profile.id, "583231");
        assert_eq!(profile.email, "octo@example.com");
        assert_eq!(profile.username.as_deref(), Some("octocat"));
    }

    #[tokio::test]
    async fn test_fetch_profile_without_verified_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1, "login": "ghost", "name": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"email": "ghost@example.com", "primary": true, "verified": false}
            ])))
            .mount(&server)
            .await;

        let github = provider_for(&server).await;
        assert!(matches!(
            github.fetch_profile("gho_abc").await,
            Err(ProviderError::NoVerifiedEmail)
        ));
    }

    #[tokio::test]
    async fn test_request_device_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/device/code"))
            .and(body_string_contains("client_id=client-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": "3584d83530557fdd1f46af8289938c8ef79f9dc5",
                "user_code": "WDJB-MJHT",
                "verification_uri": "https://github.com/login/device",
                "expires_in": 900,
                "interval": 5
            })))
            .mount(&server)
            .await;

        let github = provider_for(&server).await;
        let device = github.request_device_code(&[]).await.unwrap();
        assert_eq!(device.user_code, "WDJB-MJHT");
        assert_eq!(device.expires_in, 900);
        assert_eq!(device.interval, 5);
        assert!(device.verification_uri_complete.is_none());
    }

    #[tokio::test]
    async fn test_poll_device_token_outcomes() {
        let cases = vec![
            (json!({"error": "authorization_pending"}), DeviceTokenPoll::Pending),
            (json!({"error": "slow_down", "interval": 10}), DeviceTokenPoll::SlowDown),
            (json!({"error": "access_denied"}), DeviceTokenPoll::AccessDenied),
            (json!({"error": "expired_token"}), DeviceTokenPoll::Expired),
            (
                json!({"access_token": "gho_device", "token_type": "bearer"}),
                DeviceTokenPoll::Granted("gho_device".to_string()),
            ),
        ];

        for (body, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/login/oauth/access_token"))
                .and(body_string_contains("grant_type=urn"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&server)
                .await;

            let github = provider_for(&server).await;
            assert_eq!(github.poll_device_token("dev-code").await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_poll_device_token_unknown_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "incorrect_device_code"
            })))
            .mount(&server)
            .await;

        let github = provider_for(&server).await;
        assert!(matches!(
            github.poll_device_token("bogus").await,
            Err(ProviderError::OAuth { .. })
        ));
    }
}
