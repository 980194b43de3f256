//! PKCE (Proof Key for Code Exchange) verification per RFC 7636
//!
//! The authorization endpoint records the client's `code_challenge` and
//! method alongside the authorization code; the token endpoint checks the
//! presented `code_verifier` against it. `S256` comparison ignores trailing
//! `=` padding on both sides because some clients send padded base64url.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::CodeChallengeMethod;

/// Verify `verifier` against a recorded `challenge`.
///
/// `method` is the raw recorded method; unknown methods never validate.
pub fn validate(method: &str, challenge: &str, verifier: &str) -> bool {
    match CodeChallengeMethod::parse(method) {
        Some(method) => validate_method(method, challenge, verifier),
        None => false,
    }
}

/// Verify with an already-parsed method.
pub fn validate_method(method: CodeChallengeMethod, challenge: &str, verifier: &str) -> bool {
    match method {
        CodeChallengeMethod::Plain => challenge == verifier,
        CodeChallengeMethod::S256 => {
            let computed = compute_challenge(verifier);
            computed.trim_end_matches('=') == challenge.trim_end_matches('=')
        }
    }
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, unpadded.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a cryptographically random code verifier.
///
/// 64 random bytes encode to 86 base64url characters, inside the 43-128
/// range RFC 7636 requires.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
