//! OIDC Login Library
//!
//! Browser OpenID Connect sign-in: authorization request, code exchange,
//! ID token verification and per-user session state.

pub mod config;
pub mod error;
pub mod oidc;
pub mod server;
pub mod session;

pub use error::{AuthError, Result};
pub use session::{Session, SessionManager, SessionStatus, UserProfile};
