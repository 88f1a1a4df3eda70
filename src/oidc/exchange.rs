//! Authorization code exchange
//!
//! Back-channel POST to the token endpoint, authenticated with the client
//! secret. The redirect URI always comes from configuration.

use crate::config::ProviderConfig;
use crate::error::{AuthError, Result};
use serde::Deserialize;

/// Tokens returned for a successful exchange. Dropped once claims are read.
#[derive(Clone)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Token response from the provider
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TryFrom<TokenResponse> for TokenSet {
    type Error = AuthError;

    fn try_from(response: TokenResponse) -> Result<Self> {
        let id_token = response
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Exchange("Token response has no id_token".to_string()))?;
        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Exchange("Token response has no access_token".to_string()))?;

        Ok(TokenSet {
            id_token,
            access_token,
            expires_in: response.expires_in.unwrap_or_default(),
            token_type: response.token_type,
            scope: response.scope,
            refresh_token: response.refresh_token,
        })
    }
}

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct TokenExchanger {
    http: reqwest::Client,
    token_endpoint: String,
    config: ProviderConfig,
}

impl TokenExchanger {
    /// The client is expected to carry the request timeout.
    pub fn new(http: reqwest::Client, token_endpoint: impl Into<String>, config: ProviderConfig) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.into(),
            config,
        }
    }

    /// Exchange authorization code for tokens
    pub async fn exchange(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSet> {
        if code.is_empty() {
            return Err(AuthError::Exchange("Authorization code is empty".to_string()));
        }

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Exchange("Token endpoint timed out".to_string())
                } else {
                    AuthError::Exchange(format!("Token request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => "no OAuth error body".to_string(),
            };
            return Err(AuthError::Exchange(format!(
                "Token exchange failed with status {}: {}",
                status, detail
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Exchange(format!("Malformed token response: {}", e)))?;

        let tokens = TokenSet::try_from(token_response)?;
        tracing::debug!("Authorization code exchanged, access token valid for {}s", tokens.expires_in);
        Ok(tokens)
    }
}
