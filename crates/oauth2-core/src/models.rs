//! Clients, issued-token records and the transient request values
//!
//! `TokenInfo` is the only persisted type. It serializes to JSON with
//! RFC 3339 timestamps and lifetimes in whole seconds; a zero lifetime means
//! the corresponding credential never expires.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::{CodeChallengeMethod, ResponseType};

/// A registered client application.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    /// `None` or empty for public clients that cannot keep a secret.
    pub secret: Option<Secret<String>>,
    /// Registered redirect domain, e.g. `https://app.example.com`.
    pub domain: String,
    /// Public clients are not asked for a secret at the token endpoint.
    pub public: bool,
    /// Scopes the client may request. Empty means unrestricted.
    pub scopes: Vec<String>,
}

impl Client {
    pub fn new(
        id: impl Into<String>,
        secret: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            secret: Some(Secret::new(secret.into())),
            domain: domain.into(),
            public: false,
            scopes: Vec::new(),
        }
    }

    /// Verify a presented client secret.
    ///
    /// Public clients and clients registered without a secret accept any
    /// presented value (including none).
    pub fn verify_secret(&self, presented: &str) -> bool {
        if self.public {
            return true;
        }
        match &self.secret {
            Some(secret) if !secret.is_empty() => secret.matches(presented),
            _ => true,
        }
    }

    /// Whether every scope in the space-separated `scope` is allowed.
    pub fn allows_scope(&self, scope: &str) -> bool {
        if self.scopes.is_empty() {
            return true;
        }
        scope_items(scope).all(|s| self.scopes.iter().any(|allowed| allowed == s))
    }
}

/// One issued grant instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub client_id: String,
    pub user_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub code_created_at: DateTime<Utc>,
    #[serde(default, with = "duration_secs")]
    pub code_expires_in: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code_challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<CodeChallengeMethod>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default)]
    pub access_created_at: DateTime<Utc>,
    #[serde(default, with = "duration_secs")]
    pub access_expires_in: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    #[serde(default)]
    pub refresh_created_at: DateTime<Utc>,
    #[serde(default, with = "duration_secs")]
    pub refresh_expires_in: Duration,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extension: serde_json::Map<String, serde_json::Value>,
}

impl TokenInfo {
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref().filter(|c| !c.is_empty())
    }

    pub fn access(&self) -> Option<&str> {
        self.access.as_deref().filter(|a| !a.is_empty())
    }

    pub fn refresh(&self) -> Option<&str> {
        self.refresh.as_deref().filter(|r| !r.is_empty())
    }

    pub fn is_code_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.code_created_at, self.code_expires_in, now)
    }

    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.access_created_at, self.access_expires_in, now)
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.refresh_created_at, self.refresh_expires_in, now)
    }

    /// Remaining code lifetime, `None` when it never expires.
    pub fn code_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining(self.code_created_at, self.code_expires_in, now)
    }

    /// Remaining access lifetime, `None` when it never expires.
    pub fn access_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining(self.access_created_at, self.access_expires_in, now)
    }

    /// Remaining refresh lifetime, `None` when it never expires.
    pub fn refresh_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining(self.refresh_created_at, self.refresh_expires_in, now)
    }
}

/// Inbound authorization-endpoint call, validated.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub response_type: ResponseType,
    pub client_id: String,
    pub scope: String,
    pub redirect_uri: String,
    pub state: String,
    pub user_id: String,
    pub code_challenge: String,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub access_token_exp: Option<Duration>,
}

impl AuthorizeRequest {
    pub fn new(response_type: ResponseType, client_id: impl Into<String>) -> Self {
        Self {
            response_type,
            client_id: client_id.into(),
            scope: String::new(),
            redirect_uri: String::new(),
            state: String::new(),
            user_id: String::new(),
            code_challenge: String::new(),
            code_challenge_method: None,
            access_token_exp: None,
        }
    }

    /// Seed a generate request for the implicit flow or code issuance.
    pub fn to_generate_request(&self) -> TokenGenerateRequest {
        TokenGenerateRequest {
            client_id: self.client_id.clone(),
            user_id: self.user_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method,
            access_token_exp: self.access_token_exp,
            ..TokenGenerateRequest::default()
        }
    }
}

/// Inbound token-endpoint call, validated.
#[derive(Debug, Clone, Default)]
pub struct TokenGenerateRequest {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code: String,
    pub code_challenge: String,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub refresh: String,
    pub code_verifier: String,
    pub access_token_exp: Option<Duration>,
}

impl TokenGenerateRequest {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(Secret::new(secret.into()));
        self
    }

    /// The presented secret, empty when none was sent.
    pub fn secret(&self) -> &str {
        self.client_secret
            .as_ref()
            .map(|s| s.expose().as_str())
            .unwrap_or("")
    }
}

/// Iterate the items of a space-separated scope string.
pub fn scope_items(scope: &str) -> impl Iterator<Item = &str> {
    scope.split(' ').filter(|s| !s.is_empty())
}

/// Whether `requested` only names scopes contained in `granted`.
pub fn is_scope_subset(requested: &str, granted: &str) -> bool {
    let granted: HashSet<&str> = scope_items(granted).collect();
    scope_items(requested).all(|s| granted.contains(s))
}

fn deadline(created_at: DateTime<Utc>, expires_in: Duration) -> Option<DateTime<Utc>> {
    if expires_in.is_zero() {
        return None;
    }
    let delta = TimeDelta::from_std(expires_in).unwrap_or(TimeDelta::MAX);
    Some(created_at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
}

fn is_expired(created_at: DateTime<Utc>, expires_in: Duration, now: DateTime<Utc>) -> bool {
    deadline(created_at, expires_in).is_some_and(|d| d <= now)
}

fn remaining(
    created_at: DateTime<Utc>,
    expires_in: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    deadline(created_at, expires_in).map(|d| (d - now).to_std().unwrap_or(Duration::ZERO))
}

/// Serde helpers storing a `Duration` as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(now: DateTime<Utc>) -> TokenInfo {
        TokenInfo {
            client_id: "111111".into(),
            user_id: "000000".into(),
            scope: "all".into(),
            access: Some("at_1".into()),
            access_created_at: now,
            access_expires_in: Duration::from_secs(7200),
            refresh: Some("rt_1".into()),
            refresh_created_at: now,
            refresh_expires_in: Duration::from_secs(3 * 24 * 3600),
            ..TokenInfo::default()
        }
    }

    #[test]
    fn token_info_json_keeps_lifetimes_in_seconds() {
        let now = Utc::now();
        let ti = issued(now);
        let json = serde_json::to_value(&ti).unwrap();
        assert_eq!(json["access_expires_in"], 7200);
        assert!(json.get("code").is_none(), "absent code is omitted");

        let back: TokenInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.access(), Some("at_1"));
        assert_eq!(back.refresh_expires_in, ti.refresh_expires_in);
    }

    #[test]
    fn zero_lifetime_never_expires() {
        let ti = TokenInfo {
            access: Some("at".into()),
            access_created_at: DateTime::<Utc>::UNIX_EPOCH,
            ..TokenInfo::default()
        };
        assert!(!ti.is_access_expired(Utc::now()));
        assert_eq!(ti.access_remaining(Utc::now()), None);
    }

    #[test]
    fn expiry_is_measured_from_creation() {
        let now = Utc::now();
        let mut ti = issued(now);
        assert!(!ti.is_access_expired(now));
        ti.access_created_at = now - TimeDelta::hours(3);
        assert!(ti.is_access_expired(now));
        assert_eq!(ti.access_remaining(now), Some(Duration::ZERO));
    }

    #[test]
    fn empty_strings_read_as_absent() {
        let ti = TokenInfo {
            refresh: Some(String::new()),
            ..TokenInfo::default()
        };
        assert_eq!(ti.refresh(), None);
    }

    #[test]
    fn scope_subset_ignores_order_and_extra_spaces() {
        assert!(is_scope_subset("read", "read write"));
        assert!(is_scope_subset("write  read", "read write"));
        assert!(is_scope_subset("", "read"));
        assert!(!is_scope_subset("read admin", "read write"));
    }

    #[test]
    fn client_secret_and_scope_checks() {
        let mut client = Client::new("111111", "11111111", "http://localhost:9094");
        assert!(client.verify_secret("11111111"));
        assert!(!client.verify_secret("wrong"));
        assert!(client.allows_scope("anything"));

        client.scopes = vec!["read".into(), "write".into()];
        assert!(client.allows_scope("read write"));
        assert!(!client.allows_scope("read admin"));

        client.public = true;
        assert!(client.verify_secret(""));
    }
}
