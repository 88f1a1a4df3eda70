//! Error types for the OIDC login core

use thiserror::Error;

/// Message shown to users for any rejected sign-in.
pub const SIGN_IN_FAILED: &str = "Sign-in failed. Please try again.";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("JWKS fetch failed: {0}")]
    KeyFetch(String),

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No signing key found for kid '{0}'")]
    UnknownKey(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Claim '{claim}' rejected: {reason}")]
    ClaimValidation { claim: &'static str, reason: String },

    #[error("State mismatch - possible CSRF attack")]
    CsrfMismatch,

    #[error("Authorization denied by provider: {error} - {description}")]
    AuthorizationDenied { error: String, description: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    pub(crate) fn claim(claim: &'static str, reason: impl Into<String>) -> Self {
        AuthError::ClaimValidation {
            claim,
            reason: reason.into(),
        }
    }

    /// True for failures of the token/CSRF checks. These are never retried.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            AuthError::MalformedToken(_)
                | AuthError::UnsupportedAlgorithm(_)
                | AuthError::UnknownKey(_)
                | AuthError::InvalidSignature
                | AuthError::ClaimValidation { .. }
                | AuthError::CsrfMismatch
        )
    }

    /// True for network-side failures where trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::Exchange(_) | AuthError::KeyFetch(_) | AuthError::Discovery(_)
        )
    }

    /// Text safe to show in the browser. The detailed kind stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::Config(_) => "Sign-in is not configured on this server.",
            AuthError::AuthorizationDenied { .. } => "Sign-in was cancelled or denied.",
            _ => SIGN_IN_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
