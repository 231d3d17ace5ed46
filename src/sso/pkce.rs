//! PKCE (RFC 7636) verifier/challenge generation.
//!
//! Only the S256 challenge method is implemented; the Plain method
//! defeats the purpose of PKCE.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// PKCE code verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct Pkce {
    /// The code verifier (secret, kept client-side).
    pub verifier: String,
    /// The S256 code challenge sent to the authorization server.
    pub challenge: String,
}

impl Pkce {
    /// Generate a fresh verifier/challenge pair.
    pub fn generate() -> Self {
        let verifier = random_token();
        let challenge = s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Build a challenge from an existing verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// 32 random bytes, base64url without padding: 43 characters of
/// unreserved URI alphabet. Used for PKCE verifiers and anti-CSRF state
/// tokens alike.
pub(crate) fn random_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256: BASE64URL(SHA256(ASCII(code_verifier)))
fn s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
