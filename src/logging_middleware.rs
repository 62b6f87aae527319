// src/logging_middleware.rs
//! Middleware for logging request and response bodies in debug mode
//!
//! Credential fields are masked before anything is written to the log.

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum::body::to_bytes;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, enabled, Level};

use crate::common::{safe_email_log, safe_token_log};

/// Bodies larger than this are passed through without logging
const MAX_LOGGED_BODY: usize = 64 * 1024;

/// Token-like fields; the first and last characters survive for correlation
const TOKEN_FIELDS: [&str; 8] = [
    "accessToken",
    "refreshToken",
    "tempToken",
    "code",
    "state",
    "device_code",
    "deviceCode",
    "key",
];

/// Personal fields; only the first character and the domain survive
const EMAIL_FIELDS: [&str; 2] = ["email", "providerEmail"];

/// Fields that are never shown at all
const SECRET_FIELDS: [&str; 2] = ["password", "apiKey"];

/// Mask credential fields anywhere in a JSON document
fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (field, inner) in map.iter_mut() {
                if SECRET_FIELDS.contains(&field.as_str()) {
                    *inner = Value::String("[REDACTED]".to_string());
                } else if TOKEN_FIELDS.contains(&field.as_str()) {
                    if let Value::String(s) = inner {
                        *s = safe_token_log(s);
                    }
                } else if EMAIL_FIELDS.contains(&field.as_str()) {
                    if let Value::String(s) = inner {
                        *s = safe_email_log(s);
                    }
                } else {
                    redact(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Render a body for the log, or `None` when it should be skipped
fn loggable_body(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let body_str = std::str::from_utf8(bytes).ok()?;
    match serde_json::from_str::<Value>(body_str) {
        Ok(mut json) => {
            redact(&mut json);
            Some(serde_json::to_string_pretty(&json).unwrap_or_default())
        }
        // Non-JSON bodies may carry form-encoded credentials
        Err(_) => Some(format!("<{} bytes, not JSON>", bytes.len())),
    }
}

/// Middleware to log request and response bodies in debug mode
pub async fn log_request_response(request: Request, next: Next) -> Result<Response, StatusCode> {
    if !enabled!(Level::DEBUG) {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, MAX_LOGGED_BODY)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    if let Some(request_body) = loggable_body(&bytes) {
        debug!(
            method = %parts.method,
            uri = %parts.uri.path(),
            request_body = %request_body,
            "📥 Request"
        );
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let started = Instant::now();
    let response = next.run(request).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match loggable_body(&bytes) {
        Some(response_body) => debug!(
            status = %parts.status,
            latency_ms,
            response_body = %response_body,
            "📤 Response"
        ),
        None => debug!(status = %parts.status, latency_ms, "📤 Response"),
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_credentials() {
        let mut body = json!({
            "accessToken": "eyJhbGciOiJIUzI1NiJ9.payload.signature",
            "password": "hunter2hunter2",
            "user": { "email": "dev@example.com" },
            "keys": [{ "key": "rk_abcdefghijklmnop", "name": "ci" }]
        });
        redact(&mut body);

        assert_eq!(body["accessToken"], "eyJh...ture");
        assert_eq!(body["password"], "[REDACTED]");
        assert_eq!(body["user"]["email"], "d***@example.com");
        assert_eq!(body["keys"][0]["key"], "rk_a...mnop");
        assert_eq!(body["keys"][0]["name"], "ci");
    }

    #[test]
    fn test_emails_are_masked_in_requests_and_responses() {
        let rendered = loggable_body(
            br#"{"email":"writer@example.com","username":"writer","password":"long enough"}"#,
        )
        .unwrap();
        assert!(!rendered.contains("writer@example.com"));
        assert!(rendered.contains("w***@example.com"));
        assert!(rendered.contains("\"username\": \"writer\""));

        let mut body = json!({ "user": { "email": "élodie@example.com" } });
        redact(&mut body);
        assert_eq!(body["user"]["email"], "é***@example.com");
    }

    #[test]
    fn test_non_json_body_is_summarized() {
        assert_eq!(loggable_body(b""), None);
        assert_eq!(
            loggable_body(b"code=abc&state=def").as_deref(),
            Some("<18 bytes, not JSON>")
        );
    }
}
