//! ID token verification
//!
//! A single ordered pipeline: structure, algorithm allow-list, key lookup,
//! signature, then claims. Nothing from the payload is interpreted before the
//! signature has been checked, and the only output is verified `Claims`.

use super::{Clock, KeyCache};
use crate::error::{AuthError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;

/// Asymmetric algorithms accepted for ID tokens. `none` and HMAC never are.
pub const ALLOWED_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512"];

const REQUIRED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "iat"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::One(aud) => aud == client_id,
            Audience::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Audience::One(_) => 1,
            Audience::Many(auds) => auds.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Verified ID token payload. Optional claims are `None` when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

/// Some providers send `email_verified` as a string
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        None => None,
        Some(BoolOrString::Bool(b)) => Some(b),
        Some(BoolOrString::Str(s)) => Some(s.eq_ignore_ascii_case("true")),
    })
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Token split into its segments, with header and payload decoded as JSON.
struct Parsed<'a> {
    header: Header,
    payload: serde_json::Value,
    signing_input: &'a str,
    signature: &'a str,
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::MalformedToken(format!("{} is not base64url: {}", name, e)))
}

fn parse(token: &str) -> Result<Parsed<'_>> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature] = segments[..] else {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };

    if header_b64.is_empty() || payload_b64.is_empty() {
        return Err(AuthError::MalformedToken("empty header or payload".to_string()));
    }

    let header: Header = serde_json::from_slice(&decode_segment(header_b64, "header")?)
        .map_err(|e| AuthError::MalformedToken(format!("header is not valid JSON: {}", e)))?;

    let payload: serde_json::Value = serde_json::from_slice(&decode_segment(payload_b64, "payload")?)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not valid JSON: {}", e)))?;
    if !payload.is_object() {
        return Err(AuthError::MalformedToken("payload is not a JSON object".to_string()));
    }

    decode_segment(signature, "signature")?;

    Ok(Parsed {
        header,
        payload,
        signing_input: &token[..header_b64.len() + 1 + payload_b64.len()],
        signature,
    })
}

fn allowed_algorithm(alg: &str) -> Result<Algorithm> {
    match alg {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(AuthError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Verifies ID tokens issued to one client by one issuer.
pub struct TokenVerifier {
    issuer: String,
    client_id: String,
    clock_skew: Duration,
    keys: Arc<KeyCache>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        clock_skew: Duration,
        keys: Arc<KeyCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            clock_skew,
            keys,
            clock,
        }
    }

    /// Verify `id_token`. When `expected_nonce` is set the token must carry it.
    pub async fn verify(&self, id_token: &str, expected_nonce: Option<&str>) -> Result<Claims> {
        let parsed = parse(id_token)?;

        let alg = allowed_algorithm(&parsed.header.alg)?;
        let kid = parsed
            .header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::MalformedToken("header has no kid".to_string()))?;

        let key = self
            .keys
            .find(kid)
            .await?
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))?;

        if let Some(pinned) = key.alg.as_deref() {
            if pinned != parsed.header.alg {
                return Err(AuthError::UnsupportedAlgorithm(format!(
                    "{} (key '{}' is pinned to {})",
                    parsed.header.alg, kid, pinned
                )));
            }
        }

        let valid = jsonwebtoken::crypto::verify(
            parsed.signature,
            parsed.signing_input.as_bytes(),
            key.decoding_key(),
            alg,
        )
        .map_err(|_| AuthError::InvalidSignature)?;
        if !valid {
            return Err(AuthError::InvalidSignature);
        }

        let claims = self.validate_claims(parsed.payload, expected_nonce)?;
        tracing::debug!("ID token verified for sub {}", claims.sub);
        Ok(claims)
    }

    fn validate_claims(
        &self,
        payload: serde_json::Value,
        expected_nonce: Option<&str>,
    ) -> Result<Claims> {
        for &claim in REQUIRED_CLAIMS {
            if payload.get(claim).map_or(true, serde_json::Value::is_null) {
                return Err(AuthError::claim(claim, "missing"));
            }
        }

        let claims: Claims =
            serde_json::from_value(payload).map_err(|e| AuthError::claim("claims", e.to_string()))?;

        if claims.iss != self.issuer {
            return Err(AuthError::claim(
                "iss",
                format!("expected {}, got {}", self.issuer, claims.iss),
            ));
        }

        if claims.sub.is_empty() {
            return Err(AuthError::claim("sub", "empty subject"));
        }

        if !claims.aud.contains(&self.client_id) {
            return Err(AuthError::claim("aud", "client ID not in audience"));
        }

        match claims.azp.as_deref() {
            Some(azp) if azp != self.client_id => {
                return Err(AuthError::claim("azp", "authorized party is another client"));
            }
            None if claims.aud.len() > 1 => {
                return Err(AuthError::claim("azp", "required with multiple audiences"));
            }
            _ => {}
        }

        // Read the clock only now, after the key fetch round-trip.
        let now = self.clock.now();

        if claims.exp <= now {
            return Err(AuthError::claim(
                "exp",
                format!("expired at {}, now {}", claims.exp, now),
            ));
        }

        let skew = self.clock_skew.as_secs() as i64;
        if claims.iat > now.saturating_add(skew) {
            return Err(AuthError::claim(
                "iat",
                format!("issued at {}, now {}", claims.iat, now),
            ));
        }

        if let Some(expected) = expected_nonce {
            if claims.nonce.as_deref() != Some(expected) {
                return Err(AuthError::claim("nonce", "does not match login request"));
            }
        }

        Ok(claims)
    }
}
