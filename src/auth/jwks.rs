//! Identity-provider signing keys (JSON Web Key Set) fetching and caching.
//!
//! Keys are cached by `kid`. A token naming a `kid` that is not cached
//! triggers one refetch, which is how provider key rotation is picked up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Longest a cached key is served after fetches start failing (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC")
    pub kty: String,
    /// Key ID, matched against the JWT header `kid`
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256", "ES256")
    pub alg: Option<String>,
    /// Key use; "enc" keys are skipped
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url)
    pub n: Option<String>,
    /// RSA exponent (base64url)
    pub e: Option<String>,
    /// EC curve name (e.g., "P-256")
    pub crv: Option<String>,
    /// EC x coordinate (base64url)
    pub x: Option<String>,
    /// EC y coordinate (base64url)
    pub y: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// A verification key together with the algorithm family it may be used with.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub family: KeyFamily,
}

/// Signature family of a key; the token header's `alg` must belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
}

impl KeyFamily {
    /// Whether `alg` may be verified with a key of this family.
    pub fn permits(self, alg: Algorithm) -> bool {
        match self {
            Self::Rsa => matches!(alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512),
            Self::EcP256 => alg == Algorithm::ES256,
            Self::EcP384 => alg == Algorithm::ES384,
        }
    }
}

/// Thread-safe JWKS cache.
pub struct JwksCache {
    jwks_url: String,
    cache_ttl: Duration,
    max_stale: Duration,
    keys: Arc<RwLock<HashMap<String, VerificationKey>>>,
    last_fetch: Arc<RwLock<Option<Instant>>>,
    client: reqwest::Client,
}

impl JwksCache {
    /// Create a cache for `jwks_url`, fetching with the shared HTTP client.
    pub fn new(jwks_url: String, cache_ttl_seconds: u64, client: reqwest::Client) -> Self {
        Self {
            jwks_url,
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            max_stale: Duration::from_secs(MAX_STALE_CACHE_SECONDS),
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_fetch: Arc::new(RwLock::new(None)),
            client,
        }
    }

    /// Get a verification key by key ID.
    ///
    /// If `kid` is None and exactly one key is cached, that key is used.
    /// Fetches from the endpoint if the cache is stale or the key is unknown.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<VerificationKey, JwksError> {
        let should_refresh = {
            let last_fetch = self.last_fetch.read().await;
            match *last_fetch {
                Some(t) => t.elapsed() > self.cache_ttl,
                None => true,
            }
        };

        if !should_refresh {
            if let Some(key) = self.get_from_cache(kid).await {
                return Ok(key);
            }
        }

        match self.fetch_keys().await {
            Ok(()) => self.get_from_cache(kid).await.ok_or_else(|| match kid {
                Some(k) => JwksError::KeyNotFound(k.to_string()),
                None => JwksError::AmbiguousKey,
            }),
            Err(e) => {
                let stale_ok = self
                    .last_fetch
                    .read()
                    .await
                    .is_some_and(|t| t.elapsed() < self.max_stale);

                if stale_ok {
                    if let Some(key) = self.get_from_cache(kid).await {
                        warn!("JWKS fetch failed, using stale cache: {}", e);
                        return Ok(key);
                    }
                }
                Err(e)
            }
        }
    }

    async fn get_from_cache(&self, kid: Option<&str>) -> Option<VerificationKey> {
        let keys = self.keys.read().await;

        match kid {
            Some(k) => keys.get(k).cloned(),
            None if keys.len() == 1 => keys.values().next().cloned(),
            None => None,
        }
    }

    /// Fetch keys from the JWKS endpoint, replacing the cache.
    ///
    /// The cache lock is only taken after the response has been parsed.
    pub async fn fetch_keys(&self) -> Result<(), JwksError> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::FetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::ParseError(e.to_string()))?;

        let new_keys = Self::parse_document(jwks);
        if new_keys.is_empty() {
            return Err(JwksError::NoValidKeys);
        }

        let count = new_keys.len();
        *self.keys.write().await = new_keys;
        *self.last_fetch.write().await = Some(Instant::now());

        debug!("Cached {} signing keys", count);
        Ok(())
    }

    fn parse_document(jwks: JwksDocument) -> HashMap<String, VerificationKey> {
        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key");
                continue;
            }

            match Self::jwk_to_key(&jwk) {
                Ok(key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    keys.insert(kid, key);
                }
                Err(e) => warn!("Skipping unusable JWK: {}", e),
            }
        }
        keys
    }

    /// Convert a JWK to a verification key.
    pub fn jwk_to_key(jwk: &Jwk) -> Result<VerificationKey, JwksError> {
        match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk
                    .n
                    .as_deref()
                    .ok_or_else(|| JwksError::ParseError("Missing 'n' in RSA key".to_string()))?;
                let e = jwk
                    .e
                    .as_deref()
                    .ok_or_else(|| JwksError::ParseError("Missing 'e' in RSA key".to_string()))?;
                let key = DecodingKey::from_rsa_components(n, e).map_err(|e| {
                    JwksError::ParseError(format!("Invalid RSA components: {}", e))
                })?;
                Ok(VerificationKey {
                    key,
                    family: KeyFamily::Rsa,
                })
            }
            "EC" => {
                let family = match jwk.crv.as_deref() {
                    Some("P-256") => KeyFamily::EcP256,
                    Some("P-384") => KeyFamily::EcP384,
                    other => {
                        return Err(JwksError::ParseError(format!(
                            "Unsupported EC curve: {:?}",
                            other
                        )));
                    }
                };
                let x = jwk
                    .x
                    .as_deref()
                    .ok_or_else(|| JwksError::ParseError("Missing 'x' in EC key".to_string()))?;
                let y = jwk
                    .y
                    .as_deref()
                    .ok_or_else(|| JwksError::ParseError("Missing 'y' in EC key".to_string()))?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwksError::ParseError(format!("Invalid EC components: {}", e)))?;
                Ok(VerificationKey { key, family })
            }
            other => Err(JwksError::ParseError(format!(
                "Unsupported key type: {}",
                other
            ))),
        }
    }
}

/// Errors that can occur when working with the JWKS cache.
#[derive(Debug, Clone)]
pub enum JwksError {
    /// Failed to fetch JWKS from endpoint.
    FetchError(String),
    /// Failed to parse JWKS response or a key in it.
    ParseError(String),
    /// No usable keys found in JWKS.
    NoValidKeys,
    /// Key with specified kid not found.
    KeyNotFound(String),
    /// Token has no kid and the set holds more than one key.
    AmbiguousKey,
}

impl JwksError {
    /// Network-level failures, as opposed to a bad or unknown key.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FetchError(_))
    }
}

impl std::fmt::Display for JwksError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::AmbiguousKey => write!(f, "Token has no kid and the key set is ambiguous"),
        }
    }
}

impl std::error::Error for JwksError {}
