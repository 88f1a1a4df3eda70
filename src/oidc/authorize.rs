//! Authorization request construction
//!
//! Builds the redirect that starts the provider login. Pure apart from the
//! random values generated for `state`, `nonce` and PKCE.

use super::{PkcePair, ProviderMetadata};
use crate::config::ProviderConfig;
use crate::error::Result;
use rand::{rngs::OsRng, RngCore};
use std::fmt::Write;
use url::Url;

/// One login attempt. The caller keeps it until the callback arrives.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: String,
    pub nonce: String,
    pub redirect_url: String,
    pkce: PkcePair,
}

impl AuthorizationRequest {
    pub(crate) fn new(
        config: &ProviderConfig,
        metadata: &ProviderMetadata,
    ) -> Result<Self> {
        let state = random_token();
        let nonce = random_token();
        let pkce = PkcePair::generate();
        let redirect_url = build_login_url(config, metadata, &state, &nonce, &pkce)?;

        Ok(Self {
            state,
            nonce,
            redirect_url,
            pkce,
        })
    }

    pub fn pkce(&self) -> &PkcePair {
        &self.pkce
    }
}

/// 128 bits from the OS RNG, lowercase hex (32 chars)
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(32), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Authorization endpoint URL for the given request values
pub fn build_login_url(
    config: &ProviderConfig,
    metadata: &ProviderMetadata,
    state: &str,
    nonce: &str,
    pkce: &PkcePair,
) -> Result<String> {
    let mut url = Url::parse(&metadata.authorization_endpoint)?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("scope", &config.scopes().join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", super::pkce::CHALLENGE_METHOD);

        for (key, value) in &metadata.extra_auth_params {
            query.append_pair(key, value);
        }
    }

    Ok(url.to_string())
}
