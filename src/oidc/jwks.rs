//! JWKS (JSON Web Key Set) fetching and caching
//!
//! The cache is shared by every verification in the process. A snapshot is an
//! immutable `Arc<SigningKeySet>` swapped in whole, and refreshes are
//! single-flight: callers that miss against the same snapshot wait for one
//! fetch and share its outcome, success or failure, instead of issuing their
//! own. Refreshes triggered by an unknown `kid` are rate limited.

use super::Clock;
use crate::error::{AuthError, Result};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Public key published by the provider, ready for signature checks.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    /// Algorithm pinned by the JWK, if any
    pub alg: Option<String>,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Build from base64url RSA modulus and exponent
    pub fn from_rsa_components(
        kid: impl Into<String>,
        alg: Option<String>,
        n: &str,
        e: &str,
    ) -> Result<Self> {
        let kid = kid.into();
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| AuthError::KeyFetch(format!("Invalid RSA key '{}': {}", kid, err)))?;
        Ok(Self {
            kid,
            alg,
            decoding_key,
        })
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

/// Keys from one JWKS fetch.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: HashMap<String, SigningKey>,
    pub fetched_at: i64,
    pub ttl: Duration,
    generation: u64,
}

impl SigningKeySet {
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Fresh while `now` is inside the freshness window
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.fetched_at.saturating_add(self.ttl.as_secs() as i64)
    }
}

#[derive(Debug, Deserialize)]
struct JwkDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default, rename = "use")]
    use_: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

fn parse_jwks(body: &[u8]) -> std::result::Result<HashMap<String, SigningKey>, String> {
    let document: JwkDocument =
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse JWKS: {}", e))?;

    let mut keys = HashMap::new();
    for jwk in document.keys {
        if jwk.kty != "RSA" || jwk.use_.as_deref().is_some_and(|u| u != "sig") {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            tracing::debug!("Skipping JWK without kid or RSA components");
            continue;
        };
        match SigningKey::from_rsa_components(kid.clone(), jwk.alg, &n, &e) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(e) => tracing::warn!("Skipping unusable JWK: {}", e),
        }
    }

    Ok(keys)
}

/// `max-age` directive of a Cache-Control header
fn max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|directive| {
            directive
                .trim()
                .strip_prefix("max-age=")
                .and_then(|secs| secs.trim().parse::<u64>().ok())
        })
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct KeyCacheOptions {
    /// Freshness window when the provider sends no max-age
    pub default_ttl: Duration,
    /// Extra attempts after a network failure
    pub max_retries: u32,
    /// First retry delay, doubled per attempt
    pub retry_backoff: Duration,
    /// Minimum age of the cached set before an unknown `kid` may refetch it
    pub min_refresh_interval: Duration,
}

impl Default for KeyCacheOptions {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            min_refresh_interval: Duration::from_secs(10),
        }
    }
}

enum FetchFailure {
    Transient(String),
    Permanent(String),
}

pub struct KeyCache {
    http: reqwest::Client,
    jwks_uri: String,
    clock: Arc<dyn Clock>,
    options: KeyCacheOptions,
    current: RwLock<Option<Arc<SigningKeySet>>>,
    /// Completed fetch attempts, successful or not
    attempts: AtomicU64,
    /// Held for the duration of a fetch; carries the last failure
    refresh: Mutex<Option<String>>,
}

impl KeyCache {
    /// The client is expected to carry the request timeout.
    pub fn new(
        http: reqwest::Client,
        jwks_uri: impl Into<String>,
        clock: Arc<dyn Clock>,
        options: KeyCacheOptions,
    ) -> Self {
        Self {
            http,
            jwks_uri: jwks_uri.into(),
            clock,
            options,
            current: RwLock::new(None),
            attempts: AtomicU64::new(0),
            refresh: Mutex::new(None),
        }
    }

    async fn snapshot(&self) -> Option<Arc<SigningKeySet>> {
        self.current.read().await.clone()
    }

    /// Current keys, fetching when empty, expired or forced
    pub async fn get_keys(&self, force_refresh: bool) -> Result<Arc<SigningKeySet>> {
        let snapshot = self.snapshot().await;
        if let Some(set) = &snapshot {
            if !force_refresh && set.is_fresh(self.clock.now()) {
                return Ok(set.clone());
            }
        }

        let observed = snapshot.map(|s| s.generation).unwrap_or(0);
        self.refresh_after(observed).await
    }

    /// Key for `kid`, refreshing once if it is not in the cached set
    pub async fn find(&self, kid: &str) -> Result<Option<SigningKey>> {
        let before = self.snapshot().await.map(|s| s.generation).unwrap_or(0);
        let set = self.get_keys(false).await?;
        if let Some(key) = set.get(kid) {
            return Ok(Some(key.clone()));
        }

        // Already fetched during this lookup; another fetch would see the same document.
        if set.generation != before {
            return Ok(None);
        }

        let min_interval = self.options.min_refresh_interval.as_secs() as i64;
        if self.clock.now() < set.fetched_at.saturating_add(min_interval) {
            tracing::debug!("kid '{}' not cached, JWKS fetched too recently to refresh", kid);
            return Ok(None);
        }

        tracing::debug!("kid '{}' not cached, refreshing JWKS", kid);
        let set = self.refresh_after(set.generation).await?;
        Ok(set.get(kid).cloned())
    }

    /// Fetch unless an attempt finished while we waited, in which case its
    /// outcome is ours too
    async fn refresh_after(&self, observed: u64) -> Result<Arc<SigningKeySet>> {
        let attempts_seen = self.attempts.load(Ordering::Acquire);
        let mut last_failure = self.refresh.lock().await;

        if let Some(set) = self.snapshot().await {
            if set.generation != observed {
                return Ok(set);
            }
        }
        if self.attempts.load(Ordering::Acquire) != attempts_seen {
            if let Some(msg) = last_failure.as_ref() {
                return Err(AuthError::KeyFetch(msg.clone()));
            }
        }

        let fetched = self.fetch().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        let (keys, ttl) = match fetched {
            Ok(fetched) => {
                *last_failure = None;
                fetched
            }
            Err(msg) => {
                *last_failure = Some(msg.clone());
                return Err(AuthError::KeyFetch(msg));
            }
        };
        let set = Arc::new(SigningKeySet {
            keys,
            fetched_at: self.clock.now(),
            ttl,
            generation: observed + 1,
        });

        tracing::debug!(
            "JWKS refreshed: {} key(s), fresh for {}s",
            set.len(),
            set.ttl.as_secs()
        );

        *self.current.write().await = Some(set.clone());
        Ok(set)
    }

    async fn fetch(&self) -> std::result::Result<(HashMap<String, SigningKey>, Duration), String> {
        let mut attempt = 0;
        loop {
            match self.fetch_once().await {
                Ok(fetched) => return Ok(fetched),
                Err(FetchFailure::Transient(msg)) if attempt < self.options.max_retries => {
                    let delay = self.options.retry_backoff * 2u32.pow(attempt);
                    tracing::warn!("{}; retrying in {:?}", msg, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(FetchFailure::Transient(msg)) | Err(FetchFailure::Permanent(msg)) => {
                    return Err(msg);
                }
            }
        }
    }

    async fn fetch_once(&self) -> std::result::Result<(HashMap<String, SigningKey>, Duration), FetchFailure> {
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(format!("Failed to fetch JWKS: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let msg = format!("JWKS request failed with status: {}", status);
            return Err(if status.is_server_error() {
                FetchFailure::Transient(msg)
            } else {
                FetchFailure::Permanent(msg)
            });
        }

        let ttl = max_age(response.headers()).unwrap_or(self.options.default_ttl);
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::Transient(format!("Failed to read JWKS: {}", e)))?;

        let keys = parse_jwks(&body).map_err(FetchFailure::Permanent)?;
        Ok((keys, ttl))
    }
}
