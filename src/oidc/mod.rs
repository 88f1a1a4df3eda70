//! OIDC authentication module

pub mod authorize;
pub mod client;
pub mod clock;
pub mod discovery;
pub mod exchange;
pub mod jwks;
pub mod pkce;
pub mod verify;

pub use authorize::{build_login_url, AuthorizationRequest};
pub use client::{ClientOptions, OidcClient};
pub use clock::{Clock, FixedClock, SystemClock};
pub use discovery::ProviderMetadata;
pub use exchange::{TokenExchanger, TokenSet};
pub use jwks::{KeyCache, KeyCacheOptions, SigningKey, SigningKeySet};
pub use pkce::PkcePair;
pub use verify::{Audience, Claims, TokenVerifier};
