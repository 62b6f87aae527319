// src/auth/device.rs
//! OAuth device authorization (RFC 8628)
//!
//! The client starts a grant, shows the user code, then polls. Each poll is
//! counted before anything else is decided, so polling too fast still spends
//! the attempt budget.

use tracing::{debug, info, warn};

use super::error::AuthError;
use super::models::*;
use super::security;
use super::service::{parse_provider, provider_failure, AuthService};
use crate::common::i18n::Message;
use crate::common::now_ts;
use crate::services::oauth_provider::DeviceTokenPoll;

/// Seconds added to the poll interval on every `slow_down` (RFC 8628 §3.5)
const SLOW_DOWN_INCREMENT_SECONDS: i64 = 5;

/// Result of one poll, as seen by the client
#[derive(Debug)]
pub enum DevicePollOutcome {
    Completed(AuthOutcome),
    Pending,
    SlowDown,
    Denied,
    Expired,
}

impl AuthService {
    pub async fn initialize_device(
        &self,
        request: &DeviceInitializeRequest,
        client: &ClientInfo,
    ) -> Result<DeviceInitializeResponse, AuthError> {
        let provider = parse_provider(&request.provider)?;
        let adapter = self.provider_adapter(provider)?;
        let action = request.action.unwrap_or(OAuthAction::Register);

        security::maybe_sweep(&self.states);

        let grant = adapter
            .request_device_code(&request.scopes)
            .await
            .map_err(|e| {
                warn!(provider = %provider, error = %e, "Device authorization request failed");
                AuthError::Internal(Message::DeviceAuthorizationFailed)
            })?;

        let now = now_ts();
        self.states
            .insert_device_code(&OAuthDeviceCode {
                device_code: grant.device_code.clone(),
                user_code: grant.user_code.clone(),
                provider,
                action,
                client_ip: client.ip.clone(),
                user_agent: client.user_agent.clone(),
                scopes: request.scopes.join(" "),
                poll_interval: grant.interval,
                attempts: 0,
                last_poll_at: None,
                created_at: now,
                expires_at: now + grant.expires_in,
            })
            .await?;

        info!(
            provider = %provider,
            action = %action.as_str(),
            expires_in = grant.expires_in,
            "Device authorization started"
        );

        Ok(DeviceInitializeResponse {
            device_code: grant.device_code,
            user_code: grant.user_code,
            verification_uri: grant.verification_uri,
            verification_uri_complete: grant.verification_uri_complete,
            expires_in: grant.expires_in,
            interval: grant.interval,
        })
    }

    pub async fn poll_device(
        &self,
        device_code: &str,
        client: &ClientInfo,
    ) -> Result<DevicePollOutcome, AuthError> {
        let device = self
            .states
            .find_device_code(device_code)
            .await?
            .ok_or(AuthError::BadRequest(Message::DeviceCodeInvalid))?;

        let now = now_ts();
        if device.expires_at <= now {
            self.discard_device_code(device_code).await;
            return Err(AuthError::BadRequest(Message::DeviceCodeInvalid));
        }

        if device.attempts >= self.config.device_max_attempts {
            warn!(provider = %device.provider, attempts = device.attempts, "Device poll attempt cap reached");
            return Err(AuthError::TooManyRequests(Message::DeviceAttemptsExceeded));
        }

        self.states.record_poll(device_code, now).await?;

        if let Some(last_poll_at) = device.last_poll_at {
            if now - last_poll_at < device.poll_interval {
                debug!(attempts = device.attempts + 1, "Device poll faster than interval");
                return Err(AuthError::TooManyRequests(Message::DevicePollTooFast));
            }
        }

        security::log_ip_mismatch(device.client_ip.as_deref(), client.ip.as_deref());

        let adapter = self.provider_adapter(device.provider)?;
        let poll = adapter
            .poll_device_token(device_code)
            .await
            .map_err(|e| provider_failure(device.provider, e, Message::ProviderFailure))?;

        let provider_token = match poll {
            DeviceTokenPoll::Pending => return Ok(DevicePollOutcome::Pending),
            DeviceTokenPoll::SlowDown => {
                self.states
                    .slow_down(device_code, SLOW_DOWN_INCREMENT_SECONDS)
                    .await?;
                debug!(
                    poll_interval = device.poll_interval + SLOW_DOWN_INCREMENT_SECONDS,
                    "Provider asked the device client to slow down"
                );
                return Ok(DevicePollOutcome::SlowDown);
            }
            DeviceTokenPoll::AccessDenied => {
                self.discard_device_code(device_code).await;
                info!(provider = %device.provider, "Device authorization denied by user");
                return Ok(DevicePollOutcome::Denied);
            }
            DeviceTokenPoll::Expired => {
                self.discard_device_code(device_code).await;
                return Ok(DevicePollOutcome::Expired);
            }
            DeviceTokenPoll::Granted(token) => token,
        };

        // Only the poll that deletes the row may complete the grant
        if !self.states.delete_device_code(device_code).await? {
            return Err(AuthError::BadRequest(Message::DeviceCodeInvalid));
        }

        let profile = adapter
            .fetch_profile(&provider_token)
            .await
            .map_err(|e| provider_failure(device.provider, e, Message::ProfileFetchFailed))?;

        let outcome = self
            .resolve_identity(device.provider, &profile, device.action)
            .await?;
        info!(provider = %device.provider, "Device authorization completed");
        Ok(DevicePollOutcome::Completed(outcome))
    }

    /// Best-effort removal on a terminal path
    async fn discard_device_code(&self, device_code: &str) {
        if let Err(e) = self.states.delete_device_code(device_code).await {
            warn!(error = %e, "Failed to delete device code");
        }
    }
}
