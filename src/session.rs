//! Per-user authentication state
//!
//! One `SessionManager` per browser/user context. It is never shared between
//! users; only the `OidcClient` behind it is.
//!
//! ```text
//! Anonymous --begin_login--> PendingCallback --complete_login(ok)--> Authenticated
//!     ^                            |                                      |
//!     +------ complete_login(err) -+---------------- logout --------------+
//! ```

use crate::error::{AuthError, Result};
use crate::oidc::{AuthorizationRequest, Claims, OidcClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Anonymous,
    PendingCallback,
    Authenticated,
}

/// What the presentation layer may show about the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

impl From<Claims> for UserProfile {
    fn from(claims: Claims) -> Self {
        UserProfile {
            sub: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified.unwrap_or(false),
            name: claims.name,
            picture: claims.picture,
            given_name: claims.given_name,
            family_name: claims.family_name,
        }
    }
}

/// Snapshot handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
}

/// Query parameters of the redirect back from the provider
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

enum AuthState {
    Anonymous,
    Pending(AuthorizationRequest),
    Authenticated(UserProfile),
}

pub struct SessionManager {
    client: Arc<OidcClient>,
    state: AuthState,
}

impl SessionManager {
    pub fn new(client: Arc<OidcClient>) -> Self {
        Self {
            client,
            state: AuthState::Anonymous,
        }
    }

    pub fn current(&self) -> Session {
        match &self.state {
            AuthState::Anonymous => Session {
                status: SessionStatus::Anonymous,
                user: None,
            },
            AuthState::Pending(_) => Session {
                status: SessionStatus::PendingCallback,
                user: None,
            },
            AuthState::Authenticated(profile) => Session {
                status: SessionStatus::Authenticated,
                user: Some(profile.clone()),
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated(_))
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match &self.state {
            AuthState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// Start a login. Any earlier pending request is superseded.
    pub fn begin_login(&mut self) -> Result<AuthorizationRequest> {
        let request = self.client.start_login()?;
        self.state = AuthState::Pending(request.clone());
        tracing::debug!("Login started, awaiting provider callback");
        Ok(request)
    }

    /// URL to send the browser to; starts a login as a side effect
    pub fn login_url(&mut self) -> Result<String> {
        self.begin_login().map(|request| request.redirect_url)
    }

    /// Finish the pending login with the callback's `code` and `state`.
    ///
    /// Without a pending login this fails `CsrfMismatch` and leaves the
    /// session as it was. With one, any failure drops back to `Anonymous`.
    pub async fn complete_login(&mut self, code: &str, state: &str) -> Result<()> {
        let request = match std::mem::replace(&mut self.state, AuthState::Anonymous) {
            AuthState::Pending(request) => request,
            other => {
                self.state = other;
                tracing::warn!("Callback received without a pending login");
                return Err(AuthError::CsrfMismatch);
            }
        };

        if !constant_time_eq(state.as_bytes(), request.state.as_bytes()) {
            tracing::warn!("Sign-in rejected: {}", AuthError::CsrfMismatch);
            return Err(AuthError::CsrfMismatch);
        }

        match self.client.finish_login(&request, code).await {
            Ok(claims) => {
                let profile = UserProfile::from(claims);
                tracing::info!("User {} signed in", profile.sub);
                self.state = AuthState::Authenticated(profile);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Sign-in rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Entry point for the raw callback query
    pub async fn handle_callback(&mut self, params: &CallbackParams) -> Result<()> {
        if let Some(error) = &params.error {
            if matches!(self.state, AuthState::Pending(_)) {
                self.state = AuthState::Anonymous;
            }
            let description = params
                .error_description
                .clone()
                .unwrap_or_else(|| "No description provided".to_string());
            tracing::warn!("Provider returned error: {} - {}", error, description);
            return Err(AuthError::AuthorizationDenied {
                error: error.clone(),
                description,
            });
        }

        self.complete_login(
            params.code.as_deref().unwrap_or_default(),
            params.state.as_deref().unwrap_or_default(),
        )
        .await
    }

    /// Forget everything about the user. Safe to call in any state.
    pub fn logout(&mut self) {
        if let AuthState::Authenticated(profile) = &self.state {
            tracing::info!("User {} signed out", profile.sub);
        }
        self.state = AuthState::Anonymous;
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
