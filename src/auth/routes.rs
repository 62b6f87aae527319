//! Authentication routes

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/refresh` - Exchange a refresh token for a new pair
/// - `POST /api/auth/logout` - Logout (client-side token removal)
/// - `POST /api/auth/login` / `POST /api/auth/register` - Password accounts
/// - `POST /api/auth/oauth/initialize` / `callback` - OAuth redirect flow
/// - `POST /api/auth/oauth/device/initialize` / `callback` - OAuth device flow
/// - `GET /api/auth/check-username` - Username availability
/// - `POST /api/auth/oauth/complete-registration` - Finish an OAuth sign-up
/// - `POST /api/auth/api-keys`, `DELETE /api/auth/api-keys/:id` - API keys
/// - `GET /api/me` - Get current user information
/// - `POST /api/admin/oauth/sweep` - Purge expired flow rows now (admins)
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/refresh", post(handlers::refresh_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/register", post(handlers::register_handler))
        .route(
            "/api/auth/oauth/initialize",
            post(handlers::oauth_initialize_handler),
        )
        .route(
            "/api/auth/oauth/callback",
            post(handlers::oauth_callback_handler),
        )
        .route(
            "/api/auth/oauth/device/initialize",
            post(handlers::device_initialize_handler),
        )
        .route(
            "/api/auth/oauth/device/callback",
            post(handlers::device_callback_handler),
        )
        .route(
            "/api/auth/check-username",
            get(handlers::check_username_handler),
        )
        .route(
            "/api/auth/oauth/complete-registration",
            post(handlers::complete_registration_handler),
        )
        .route("/api/auth/api-keys", post(handlers::create_api_key_handler))
        .route(
            "/api/auth/api-keys/:id",
            delete(handlers::revoke_api_key_handler),
        )
        .route("/api/me", get(handlers::me_handler))
        .route(
            "/api/admin/oauth/sweep",
            post(handlers::sweep_oauth_handler),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::{JwtConfig, OAuthConfig};
    use crate::common::migrations::create_schema;
    use crate::common::AppState;
    use crate::services::oauth_provider::ProviderRegistry;
    use crate::auth::AuthService;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app() -> (Router, SqlitePool) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();

        let auth_service = Arc::new(AuthService::new(
            pool.clone(),
            &JwtConfig::default(),
            OAuthConfig::default(),
            ProviderRegistry::new(),
        ));

        let router = auth_routes().layer(Extension(Arc::new(AppState { auth_service })));
        (router, pool)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_me_requires_credentials() {
        let (app, _pool) = app().await;

        let (status, body) = send(&app, Request::get("/api/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert_eq!(body["error"], "Authentication required");

        let request = Request::get("/api/me")
            .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "需要登录");
    }

    #[tokio::test]
    async fn test_register_then_me_and_api_key() {
        let (app, pool) = app().await;

        let (status, body) = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({ "email": "dev@example.com", "username": "dev_user", "password": "long enough" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let access_token = body["accessToken"].as_str().unwrap().to_string();

        let request = Request::get("/api/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "dev_user");
        assert_eq!(body["emailVerified"], false);

        let key_request = || {
            Request::post("/api/auth/api-keys")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::from(json!({ "name": "ci", "scopes": ["profile:read"] }).to_string()))
                .unwrap()
        };
        let (status, body) = send(&app, key_request()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        // Verification state is read from the token, so sign in again
        sqlx::query("UPDATE users SET email_verified = 1 WHERE username = 'dev_user'")
            .execute(&pool)
            .await
            .unwrap();
        let (status, body) = send(
            &app,
            post_json(
                "/api/auth/login",
                json!({ "email": "dev@example.com", "password": "long enough" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let access_token = body["accessToken"].as_str().unwrap().to_string();

        let request = Request::post("/api/auth/api-keys")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .body(Body::from(json!({ "name": "ci", "scopes": ["profile:read"] }).to_string()))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        let key = body["key"].as_str().unwrap().to_string();
        let key_id = body["id"].as_str().unwrap().to_string();

        let request = Request::get("/api/me")
            .header("x-api-key", key.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "dev_user");

        // A key without profile:write cannot revoke, not even itself
        let request = Request::delete(format!("/api/auth/api-keys/{}", key_id))
            .header("x-api-key", key.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let request = Request::delete(format!("/api/auth/api-keys/{}", key_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    async fn login_token(app: &Router, email: &str, password: &str) -> String {
        let (status, body) = send(
            app,
            post_json("/api/auth/login", json!({ "email": email, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["accessToken"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_manual_sweep_requires_admin() {
        let (app, pool) = app().await;
        let (status, _) = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({ "email": "ops@example.com", "username": "ops", "password": "long enough" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let sweep = |token: &str| {
            Request::post("/api/admin/oauth/sweep")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };

        let anonymous = Request::post("/api/admin/oauth/sweep")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, anonymous).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let token = login_token(&app, "ops@example.com", "long enough").await;
        let (status, body) = send(&app, sweep(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        sqlx::query(
            "INSERT INTO oauth_states (state, nonce, provider, action, redirect_url, client_ip, created_at, expires_at) \
             VALUES ('stale', 'n', 'github', 'login', NULL, NULL, 0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        // The role claim is read from the token, so sign in again
        sqlx::query("UPDATE users SET role = 'admin' WHERE username = 'ops'")
            .execute(&pool)
            .await
            .unwrap();
        let token = login_token(&app, "ops@example.com", "long enough").await;
        let (status, body) = send(&app, sweep(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["states"], 1);
        assert_eq!(body["deviceCodes"], 0);
        assert_eq!(body["pendingRegistrations"], 0);
    }

    #[tokio::test]
    async fn test_oauth_errors_use_taxonomy() {
        let (app, _pool) = app().await;

        let (status, body) = send(
            &app,
            post_json("/api/auth/oauth/initialize", json!({ "provider": "github" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL");

        let (status, body) = send(
            &app,
            post_json("/api/auth/oauth/device/callback", json!({ "deviceCode": "unknown" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let (status, body) = send(
            &app,
            Request::get("/api/auth/check-username?username=fresh_name")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], true);
    }
}
