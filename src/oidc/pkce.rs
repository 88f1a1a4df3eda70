//! PKCE (Proof Key for Code Exchange), RFC 7636 S256
//!
//! Binds the authorization code to the browser session that started the
//! login, on top of the confidential client secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};

const VERIFIER_LEN: usize = 64;

pub const CHALLENGE_METHOD: &str = "S256";

#[derive(Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Fresh random verifier (64 URL-safe characters) and its challenge
    pub fn generate() -> Self {
        let verifier: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_LEN)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    /// Secret half, sent only on the back-channel token exchange
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Public half, sent on the authorization redirect
    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}
