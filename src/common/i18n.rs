// src/common/i18n.rs
//! Localized user-facing messages
//!
//! Every message that can reach a client is a [`Message`] key rendered per
//! [`Locale`]. The locale is picked from the `Accept-Language` header.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::ACCEPT_LANGUAGE, request::Parts},
};
use std::convert::Infallible;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    /// Resolve a locale from an `Accept-Language` value.
    ///
    /// Only the first language tag is considered; quality weights are ignored.
    pub fn from_accept_language(header: &str) -> Self {
        let primary = header
            .split(',')
            .next()
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if primary.starts_with("zh") {
            Locale::Zh
        } else {
            Locale::En
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Locale
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|h| h.to_str().ok())
            .map(Locale::from_accept_language)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    // credentials
    AuthenticationRequired,
    InvalidToken,
    InvalidCredentials,
    UserNotFound,
    LogoutSuccess,
    InsufficientScope,
    InsufficientRole,
    EmailNotVerified,

    // oauth redirect flow
    UnsupportedProvider,
    ProviderNotConfigured,
    TooManyPendingStates,
    InvalidRedirectUrl,
    InvalidCallbackParams,
    InvalidState,
    ProviderAccessDenied,
    ProviderInvalidRequest,
    ProviderUnavailable,
    ProviderFailure,
    NoVerifiedEmail,
    ProfileFetchFailed,
    AccountNotFound,

    // registration
    InvalidTempToken,
    UsernameTaken,
    EmailTaken,

    // device flow
    DeviceCodeInvalid,
    DeviceAttemptsExceeded,
    DevicePollTooFast,
    DeviceAuthorizationFailed,
    AuthorizationPending,
    SlowDown,
    DeviceAccessDenied,
    DeviceCodeExpired,

    // api keys
    ApiKeyNotFound,

    // validation
    UsernameLength,
    UsernameCharacters,
    EmailInvalid,
    PasswordTooShort,
    NameRequired,
    InvalidScope,
    InvalidExpiry,

    InternalError,
}

impl Message {
    pub fn text(self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => self.en(),
            Locale::Zh => self.zh(),
        }
    }

    fn en(self) -> &'static str {
        match self {
            Message::AuthenticationRequired => "Authentication required",
            Message::InvalidToken => "Invalid or expired token",
            Message::InvalidCredentials => "Invalid email or password",
            Message::UserNotFound => "User not found",
            Message::LogoutSuccess => "Logged out successfully",
            Message::InsufficientScope => "API key does not grant the required scope",
            Message::InsufficientRole => "You do not have permission to perform this action",
            Message::EmailNotVerified => "Email address must be verified first",
            Message::UnsupportedProvider => "Unsupported OAuth provider",
            Message::ProviderNotConfigured => "OAuth provider is not configured",
            Message::TooManyPendingStates => {
                "Too many pending sign-in attempts, please try again later"
            }
            Message::InvalidRedirectUrl => "Invalid redirect URL",
            Message::InvalidCallbackParams => "Invalid authorization code or state",
            Message::InvalidState => "Invalid or expired state",
            Message::ProviderAccessDenied => "Authorization was denied at the provider",
            Message::ProviderInvalidRequest => "The provider rejected the authorization request",
            Message::ProviderUnavailable => "The provider is temporarily unavailable",
            Message::ProviderFailure => "Sign-in with the provider failed",
            Message::NoVerifiedEmail => "The provider account has no verified email address",
            Message::ProfileFetchFailed => "Failed to fetch profile from the provider",
            Message::AccountNotFound => "No account is linked to this identity, please register first",
            Message::InvalidTempToken => "Registration session is invalid or has expired",
            Message::UsernameTaken => "Username is already taken",
            Message::EmailTaken => "Email is already registered",
            Message::DeviceCodeInvalid => "Invalid or expired device code",
            Message::DeviceAttemptsExceeded => {
                "Too many polling attempts, please restart device authorization"
            }
            Message::DevicePollTooFast => "Polling too frequently, please slow down",
            Message::DeviceAuthorizationFailed => "Failed to start device authorization",
            Message::AuthorizationPending => "Authorization is still pending",
            Message::SlowDown => "Polling interval must be increased",
            Message::DeviceAccessDenied => "The user denied the authorization request",
            Message::DeviceCodeExpired => "The device code has expired",
            Message::ApiKeyNotFound => "API key not found",
            Message::UsernameLength => "Username must be between 3 and 32 characters",
            Message::UsernameCharacters => {
                "Username may only contain letters, digits, underscores and hyphens"
            }
            Message::EmailInvalid => "Email address is invalid",
            Message::PasswordTooShort => "Password must be at least 8 characters",
            Message::NameRequired => "Name is required",
            Message::InvalidScope => "Unknown scope",
            Message::InvalidExpiry => "Expiry must be between 1 and 365 days",
            Message::InternalError => "Internal server error",
        }
    }

    fn zh(self) -> &'static str {
        match self {
            Message::AuthenticationRequired => "需要登录",
            Message::InvalidToken => "令牌无效或已过期",
            Message::InvalidCredentials => "邮箱或密码错误",
            Message::UserNotFound => "用户不存在",
            Message::LogoutSuccess => "已成功退出登录",
            Message::InsufficientScope => "API 密钥没有所需的权限范围",
            Message::InsufficientRole => "您没有执行此操作的权限",
            Message::EmailNotVerified => "请先验证邮箱地址",
            Message::UnsupportedProvider => "不支持的 OAuth 提供方",
            Message::ProviderNotConfigured => "OAuth 提供方未配置",
            Message::TooManyPendingStates => "待完成的登录请求过多，请稍后再试",
            Message::InvalidRedirectUrl => "重定向地址无效",
            Message::InvalidCallbackParams => "授权码或 state 参数无效",
            Message::InvalidState => "state 无效或已过期",
            Message::ProviderAccessDenied => "提供方拒绝了授权",
            Message::ProviderInvalidRequest => "提供方拒绝了授权请求",
            Message::ProviderUnavailable => "提供方暂时不可用",
            Message::ProviderFailure => "通过提供方登录失败",
            Message::NoVerifiedEmail => "提供方账号没有已验证的邮箱",
            Message::ProfileFetchFailed => "获取提供方用户信息失败",
            Message::AccountNotFound => "该身份尚未关联账号，请先注册",
            Message::InvalidTempToken => "注册会话无效或已过期",
            Message::UsernameTaken => "用户名已被占用",
            Message::EmailTaken => "邮箱已被注册",
            Message::DeviceCodeInvalid => "设备码无效或已过期",
            Message::DeviceAttemptsExceeded => "轮询次数过多，请重新发起设备授权",
            Message::DevicePollTooFast => "轮询过于频繁，请降低频率",
            Message::DeviceAuthorizationFailed => "发起设备授权失败",
            Message::AuthorizationPending => "授权尚未完成",
            Message::SlowDown => "请增大轮询间隔",
            Message::DeviceAccessDenied => "用户拒绝了授权请求",
            Message::DeviceCodeExpired => "设备码已过期",
            Message::ApiKeyNotFound => "API 密钥不存在",
            Message::UsernameLength => "用户名长度必须在 3 到 32 个字符之间",
            Message::UsernameCharacters => "用户名只能包含字母、数字、下划线和连字符",
            Message::EmailInvalid => "邮箱地址无效",
            Message::PasswordTooShort => "密码长度至少为 8 个字符",
            Message::NameRequired => "名称不能为空",
            Message::InvalidScope => "未知的权限范围",
            Message::InvalidExpiry => "有效期必须在 1 到 365 天之间",
            Message::InternalError => "服务器内部错误",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_from_accept_language() {
        assert_eq!(Locale::from_accept_language("zh-CN,zh;q=0.9,en;q=0.8"), Locale::Zh);
        assert_eq!(Locale::from_accept_language("en-US,en;q=0.9"), Locale::En);
        assert_eq!(Locale::from_accept_language("fr"), Locale::En);
        assert_eq!(Locale::from_accept_language(""), Locale::En);
    }

    #[test]
    fn test_messages_differ_per_locale() {
        let msg = Message::InvalidState;
        assert_eq!(msg.text(Locale::En), "Invalid or expired state");
        assert_ne!(msg.text(Locale::En), msg.text(Locale::Zh));
    }
}
