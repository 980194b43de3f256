//! Token and authorization-code generation
//!
//! The engine only relies on generated values being unguessable and unique;
//! it never inspects their structure. [`RandomTokenGenerator`] produces
//! opaque base64url strings. Signed formats plug in by implementing
//! [`TokenGenerator`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{Client, TokenGenerateRequest, TokenInfo};

/// Everything a generator may draw on for one issuance.
#[derive(Debug)]
pub struct GenerateBasic<'a> {
    pub client: &'a Client,
    pub user_id: &'a str,
    pub created_at: DateTime<Utc>,
    /// The record being built; its access/refresh fields are not yet set.
    pub token_info: &'a TokenInfo,
    pub request: &'a TokenGenerateRequest,
}

/// Generated access token and optional refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedToken {
    pub access: String,
    pub refresh: Option<String>,
}

/// Pluggable producer of codes and tokens.
///
/// A failure (e.g. an exhausted entropy source or an unavailable signing
/// key) aborts the request being serviced with a server error.
pub trait TokenGenerator: Send + Sync {
    /// Produce an authorization code.
    fn generate_code(&self, basic: &GenerateBasic<'_>) -> Result<String>;

    /// Produce an access token and, when `with_refresh`, a refresh token.
    fn generate_token(
        &self,
        basic: &GenerateBasic<'_>,
        with_refresh: bool,
    ) -> Result<GeneratedToken>;
}

/// Opaque random tokens.
///
/// Each value is `BASE64URL(SHA256(client_id | user_id | created_at | 32
/// random bytes))`; the random bytes carry the entropy, the identity fields
/// keep values from different issuances distinct even under a degraded RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl RandomTokenGenerator {
    pub fn new() -> Self {
        Self
    }

    fn digest(basic: &GenerateBasic<'_>, label: &[u8]) -> String {
        let mut nonce = [0u8; 32];
        rand::rng().fill(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(label);
        hasher.update(basic.client.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(basic.user_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(
            basic
                .created_at
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_be_bytes(),
        );
        hasher.update(nonce);
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn generate_code(&self, basic: &GenerateBasic<'_>) -> Result<String> {
        Ok(Self::digest(basic, b"code"))
    }

    fn generate_token(
        &self,
        basic: &GenerateBasic<'_>,
        with_refresh: bool,
    ) -> Result<GeneratedToken> {
        let access = Self::digest(basic, b"access");
        let refresh = with_refresh.then(|| Self::digest(basic, b"refresh"));
        Ok(GeneratedToken { access, refresh })
    }
}
