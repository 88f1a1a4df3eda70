//! OIDC provider metadata
//!
//! Endpoints the login flow talks to, either configured directly or fetched
//! from /.well-known/openid-configuration

use crate::error::{AuthError, Result};
use serde::Deserialize;

/// Provider-specific authorization parameters sent by default.
///
/// `access_type=offline` and `prompt=consent` make Google issue a refresh
/// token and re-ask for consent on every login.
pub const DEFAULT_EXTRA_AUTH_PARAMS: &[(&str, &str)] = &[
    ("access_type", "offline"),
    ("include_granted_scopes", "true"),
    ("prompt", "consent"),
];

#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub extra_auth_params: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    jwks_uri: Option<String>,
}

impl ProviderMetadata {
    pub fn new(
        issuer: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            jwks_uri: jwks_uri.into(),
            extra_auth_params: DEFAULT_EXTRA_AUTH_PARAMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Replace the provider-specific authorization parameters
    pub fn with_extra_auth_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.extra_auth_params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Discover provider metadata from the issuer URL
    pub async fn discover(http: &reqwest::Client, issuer_url: &str) -> Result<Self> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );

        let response = http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| AuthError::Discovery(format!("Failed to fetch OIDC configuration: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "OIDC discovery request failed with status: {}",
                response.status()
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("Failed to parse OIDC configuration: {}", e)))?;

        if document.authorization_endpoint.is_empty() || document.token_endpoint.is_empty() {
            return Err(AuthError::Discovery(
                "OIDC configuration missing authorization or token endpoint".to_string(),
            ));
        }

        let jwks_uri = document
            .jwks_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| AuthError::Discovery("OIDC configuration missing jwks_uri".to_string()))?;

        // ID tokens are checked against this value, so a document claiming
        // another issuer is refused outright.
        if document.issuer.trim_end_matches('/') != issuer_url.trim_end_matches('/') {
            return Err(AuthError::Discovery(format!(
                "Issuer mismatch: expected {}, document says {}",
                issuer_url, document.issuer
            )));
        }

        tracing::debug!("Discovered OIDC endpoints for {}", document.issuer);

        Ok(Self::new(
            document.issuer,
            document.authorization_endpoint,
            document.token_endpoint,
            jwks_uri,
        ))
    }
}
