//! Token lifetimes per grant type
//!
//! All durations deserialize from whole seconds. A zero lifetime issues a
//! credential that never expires.

use std::time::Duration;

use oauth2_core::GrantType;
use oauth2_core::models::duration_secs;
use serde::Deserialize;

/// Lifetimes for one grant type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TokenConfig {
    #[serde(rename = "access_token_exp_secs", with = "duration_secs")]
    pub access_token_exp: Duration,
    #[serde(rename = "refresh_token_exp_secs", default, with = "duration_secs")]
    pub refresh_token_exp: Duration,
    #[serde(default)]
    pub is_generate_refresh: bool,
}

impl TokenConfig {
    pub const fn new(
        access_token_exp: Duration,
        refresh_token_exp: Duration,
        is_generate_refresh: bool,
    ) -> Self {
        Self {
            access_token_exp,
            refresh_token_exp,
            is_generate_refresh,
        }
    }

    /// Authorization code grant: 2h access, 72h refresh.
    pub const fn authorize_code() -> Self {
        Self::new(hours(2), hours(72), true)
    }

    /// Implicit grant: 1h access, no refresh.
    pub const fn implicit() -> Self {
        Self::new(hours(1), Duration::ZERO, false)
    }

    /// Password grant: 2h access, 7d refresh.
    pub const fn password() -> Self {
        Self::new(hours(2), hours(24 * 7), true)
    }

    /// Client credentials grant: 2h access, no refresh.
    pub const fn client_credentials() -> Self {
        Self::new(hours(2), Duration::ZERO, false)
    }
}

/// Behaviour of the refresh grant.
///
/// Zero lifetimes keep the lifetimes of the record being refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    #[serde(rename = "access_token_exp_secs", with = "duration_secs")]
    pub access_token_exp: Duration,
    #[serde(rename = "refresh_token_exp_secs", with = "duration_secs")]
    pub refresh_token_exp: Duration,
    /// Issue a new refresh token instead of reusing the presented one.
    pub is_generate_refresh: bool,
    /// Restart the refresh lifetime when the refresh token is reused.
    pub is_reset_refresh_time: bool,
    /// Revoke the previous access token.
    pub is_remove_access: bool,
    /// Revoke the previous refresh token once a new one is issued.
    pub is_remove_refresh: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            access_token_exp: Duration::ZERO,
            refresh_token_exp: Duration::ZERO,
            is_generate_refresh: true,
            is_reset_refresh_time: false,
            is_remove_access: true,
            is_remove_refresh: true,
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Authorization code lifetime.
    #[serde(rename = "code_exp_secs", with = "duration_secs")]
    pub code_exp: Duration,
    pub authorize_code: TokenConfig,
    pub implicit: TokenConfig,
    pub password: TokenConfig,
    pub client_credentials: TokenConfig,
    pub refresh: RefreshConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            code_exp: Duration::from_secs(10 * 60),
            authorize_code: TokenConfig::authorize_code(),
            implicit: TokenConfig::implicit(),
            password: TokenConfig::password(),
            client_credentials: TokenConfig::client_credentials(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Token configuration for a grant issued directly (not by refresh).
    ///
    /// The refresh grant borrows the authorization code lifetimes where its
    /// own configuration leaves them at zero.
    pub fn grant(&self, grant_type: GrantType) -> TokenConfig {
        match grant_type {
            GrantType::AuthorizationCode => self.authorize_code,
            GrantType::Implicit => self.implicit,
            GrantType::PasswordCredentials => self.password,
            GrantType::ClientCredentials => self.client_credentials,
            GrantType::Refreshing => TokenConfig {
                access_token_exp: non_zero_or(
                    self.refresh.access_token_exp,
                    self.authorize_code.access_token_exp,
                ),
                refresh_token_exp: non_zero_or(
                    self.refresh.refresh_token_exp,
                    self.authorize_code.refresh_token_exp,
                ),
                is_generate_refresh: self.refresh.is_generate_refresh,
            },
        }
    }
}

const fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 3600)
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() { fallback } else { value }
}
