//! OIDC client implementation
//!
//! Process-wide half of the login flow: one instance is shared by every user
//! session. Owns the HTTP client, the signing key cache, the exchanger and the
//! verifier. Per-user state lives in `crate::session`.

use super::{
    AuthorizationRequest, Claims, Clock, KeyCache, KeyCacheOptions, ProviderMetadata,
    SystemClock, TokenExchanger, TokenVerifier,
};
use crate::config::ProviderConfig;
use crate::error::{AuthError, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ClientOptions {
    /// Bound on every request to the provider
    pub http_timeout: Duration,
    pub jwks_ttl: Duration,
    pub jwks_max_retries: u32,
    pub jwks_retry_backoff: Duration,
    /// Minimum age of the key set before an unknown `kid` refetches it
    pub jwks_min_refresh_interval: Duration,
    /// Tolerance for `iat` in the future
    pub clock_skew: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let jwks = KeyCacheOptions::default();
        Self {
            http_timeout: Duration::from_secs(10),
            jwks_ttl: jwks.default_ttl,
            jwks_max_retries: jwks.max_retries,
            jwks_retry_backoff: jwks.retry_backoff,
            jwks_min_refresh_interval: jwks.min_refresh_interval,
            clock_skew: Duration::from_secs(300),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Build the shared HTTP client with the configured timeout
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))
}

pub struct OidcClient {
    config: ProviderConfig,
    metadata: ProviderMetadata,
    keys: Arc<KeyCache>,
    exchanger: TokenExchanger,
    verifier: TokenVerifier,
}

impl OidcClient {
    /// Create a new OIDC client
    pub fn new(
        config: ProviderConfig,
        metadata: ProviderMetadata,
        options: ClientOptions,
    ) -> Result<Self> {
        config.validate()?;
        let http = http_client(options.http_timeout)?;
        Ok(Self::with_http_client(config, metadata, options, http))
    }

    /// Create a client on top of an existing HTTP client
    pub fn with_http_client(
        config: ProviderConfig,
        metadata: ProviderMetadata,
        options: ClientOptions,
        http: reqwest::Client,
    ) -> Self {
        let keys = Arc::new(KeyCache::new(
            http.clone(),
            metadata.jwks_uri.clone(),
            options.clock.clone(),
            KeyCacheOptions {
                default_ttl: options.jwks_ttl,
                max_retries: options.jwks_max_retries,
                retry_backoff: options.jwks_retry_backoff,
                min_refresh_interval: options.jwks_min_refresh_interval,
            },
        ));
        let exchanger = TokenExchanger::new(http, metadata.token_endpoint.clone(), config.clone());
        let verifier = TokenVerifier::new(
            metadata.issuer.clone(),
            config.client_id.clone(),
            options.clock_skew,
            keys.clone(),
            options.clock,
        );

        Self {
            config,
            metadata,
            keys,
            exchanger,
            verifier,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Fresh authorization request with new state, nonce and PKCE values
    pub fn start_login(&self) -> Result<AuthorizationRequest> {
        AuthorizationRequest::new(&self.config, &self.metadata)
    }

    /// Exchange the code issued for `request` and verify the ID token
    pub async fn finish_login(&self, request: &AuthorizationRequest, code: &str) -> Result<Claims> {
        let tokens = self
            .exchanger
            .exchange(code, Some(request.pkce().verifier()))
            .await?;

        self.verifier
            .verify(&tokens.id_token, Some(&request.nonce))
            .await
    }
}
