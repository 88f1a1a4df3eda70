//! Configuration parsing and validation

use crate::error::{AuthError, Result};
use crate::oidc::{ClientOptions, ProviderMetadata};
use crate::server::RegistryOptions;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_SCOPES: &str = "openid email profile";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:8501/auth/callback";

/// Routes served next to the callback
const RESERVED_PATHS: &[&str] = &["/", "/login", "/me", "/logout"];

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";
pub const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_JWKS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "oidc-login",
    version,
    about = "Browser OpenID Connect sign-in with verified ID tokens",
    long_about = "Serves a login/callback surface that runs the OIDC authorization code flow against an identity provider and keeps a verified session per browser"
)]
pub struct Config {
    /// OAuth client ID
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub client_id: String,

    /// OAuth client secret (confidential client)
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Redirect URI registered with the provider (default: http://localhost:8501/auth/callback)
    #[arg(long, env = "OAUTH_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Space-separated OAuth scopes (default: "openid email profile")
    #[arg(long, env = "OAUTH_SCOPES")]
    pub scopes: Option<String>,

    /// Expected ID token issuer
    #[arg(long, env = "OIDC_ISSUER_URL", default_value = GOOGLE_ISSUER)]
    pub issuer: String,

    /// Authorization endpoint
    #[arg(long, env = "OIDC_AUTHORIZATION_ENDPOINT", default_value = GOOGLE_AUTHORIZATION_ENDPOINT)]
    pub authorization_endpoint: String,

    /// Token endpoint
    #[arg(long, env = "OIDC_TOKEN_ENDPOINT", default_value = GOOGLE_TOKEN_ENDPOINT)]
    pub token_endpoint: String,

    /// JWKS endpoint
    #[arg(long, env = "OIDC_JWKS_URI", default_value = GOOGLE_JWKS_URI)]
    pub jwks_uri: String,

    /// Resolve endpoints from the issuer's /.well-known/openid-configuration
    #[arg(long, env = "OIDC_DISCOVER")]
    pub discover: bool,

    /// Address for the login/callback HTTP surface
    #[arg(long, env = "OIDC_LOGIN_LISTEN", default_value = "127.0.0.1:8501")]
    pub listen: SocketAddr,

    /// Timeout for every request to the provider, in seconds
    #[arg(long, default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// How long fetched signing keys stay fresh when the provider sends no max-age
    #[arg(long, default_value_t = 3600)]
    pub jwks_ttl_secs: u64,

    /// Tolerated clock skew for the `iat` claim, in seconds
    #[arg(long, default_value_t = 300)]
    pub clock_skew_secs: u64,

    /// Drop browser sessions unused for this many seconds
    #[arg(long, default_value_t = 3600)]
    pub session_idle_secs: u64,

    /// Maximum number of live browser sessions
    #[arg(long, default_value_t = 10_000)]
    pub max_sessions: usize,

    /// Show only error messages
    #[arg(long, conflicts_with = "debug")]
    pub silent: bool,

    /// Enable debug logging
    #[arg(long, env = "OIDC_LOGIN_DEBUG")]
    pub debug: bool,
}

impl Config {
    /// Parse configuration from CLI arguments and environment variables
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// Client identity resolved from the flags, validated
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        let scopes = self.scopes.as_deref().unwrap_or(DEFAULT_SCOPES);
        let config = ProviderConfig::new(
            self.client_id.clone(),
            self.client_secret.clone(),
            self.redirect_uri
                .clone()
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            scopes.split_whitespace(),
        );
        config.validate()?;
        Ok(config)
    }

    /// Provider endpoints as given on the command line (Google by default)
    pub fn static_metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(
            self.issuer.clone(),
            self.authorization_endpoint.clone(),
            self.token_endpoint.clone(),
            self.jwks_uri.clone(),
        )
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            jwks_ttl: Duration::from_secs(self.jwks_ttl_secs),
            clock_skew: Duration::from_secs(self.clock_skew_secs),
            ..ClientOptions::default()
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            idle_timeout: Duration::from_secs(self.session_idle_secs),
            max_sessions: self.max_sessions,
        }
    }

    /// Get log level based on flags
    pub fn log_level(&self) -> tracing::Level {
        if self.silent {
            tracing::Level::ERROR
        } else if self.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

/// Resolved client identity. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    scopes: Vec<String>,
}

impl ProviderConfig {
    /// Scopes are de-duplicated in order, with `openid` forced to the front.
    pub fn new<I, S>(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized = vec!["openid".to_string()];
        for scope in scopes {
            let scope = scope.into();
            if !scope.is_empty() && !normalized.contains(&scope) {
                normalized.push(scope);
            }
        }

        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: normalized,
        }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("client ID is required".to_string()));
        }

        if self.client_secret.trim().is_empty() {
            return Err(AuthError::Config("client secret is required".to_string()));
        }

        let redirect = url::Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::Config(format!("Invalid redirect URI: {}", e)))?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "Redirect URI must be http(s), got '{}'",
                redirect.scheme()
            )));
        }
        if RESERVED_PATHS.contains(&redirect.path()) {
            return Err(AuthError::Config(format!(
                "Redirect URI path '{}' collides with a built-in route",
                redirect.path()
            )));
        }

        Ok(())
    }
}
