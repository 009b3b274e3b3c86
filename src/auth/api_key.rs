//! API key gate for non-interactive callers.
//!
//! Only the base64 SHA-256 digest of the key is configured. Callers present
//! the key as `Authorization: Bearer <key>` or `X-API-Key: <key>`.

use std::fmt;

use axum::http::{HeaderMap, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::auth::secret::{SecretError, TOKEN_BYTES, generate_token};

/// Fallback header for clients that cannot set `Authorization`.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Body returned while the gate is locked.
pub const API_UNAVAILABLE: &str = "API unavailable";

const DIGEST_LEN: usize = 32;

/// Constant-time gate in front of the API namespace.
///
/// A gate without a usable digest is locked: every request gets 403.
#[derive(Clone)]
pub struct ApiKeyGate {
    digest: Option<Vec<u8>>,
}

impl ApiKeyGate {
    /// Build a gate from the configured digest. An empty or undecodable
    /// digest yields a locked gate.
    pub fn from_digest(encoded: &str) -> Self {
        if encoded.is_empty() {
            warn!("No API key digest configured, API access is disabled");
            return Self::locked();
        }

        match parse_digest(encoded) {
            Ok(digest) => Self {
                digest: Some(digest.to_vec()),
            },
            Err(e) => {
                warn!("{}, API access is disabled", e);
                Self::locked()
            }
        }
    }

    pub fn locked() -> Self {
        Self { digest: None }
    }

    pub fn is_locked(&self) -> bool {
        self.digest.is_none()
    }

    /// Check the request's credentials.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), ApiKeyError> {
        let Some(expected) = self.digest.as_deref() else {
            return Err(ApiKeyError::Unavailable);
        };

        let Some(key) = extract_key(headers) else {
            return Err(ApiKeyError::Missing);
        };

        if digest_matches(expected, key) {
            Ok(())
        } else {
            Err(ApiKeyError::Invalid)
        }
    }
}

fn digest_matches(expected: &[u8], key: &str) -> bool {
    let supplied = Sha256::digest(key.as_bytes());
    if supplied.len() != expected.len() {
        return false;
    }
    supplied.as_slice().ct_eq(expected).into()
}

/// Key from `Authorization: Bearer`, falling back to `X-API-Key`.
pub fn extract_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, key)| key.trim())
        .filter(|k| !k.is_empty());

    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
    })
}

/// Decode a configured digest, which must be base64 of exactly 32 bytes.
pub fn parse_digest(encoded: &str) -> Result<[u8; DIGEST_LEN], ApiKeyError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiKeyError::MalformedDigest(e.to_string()))?;

    <[u8; DIGEST_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        ApiKeyError::MalformedDigest(format!(
            "expected {} bytes, got {}",
            DIGEST_LEN,
            bytes.len()
        ))
    })
}

/// Base64 SHA-256 digest of a key, in the form `api_key` expects.
pub fn digest_key(key: &str) -> String {
    STANDARD.encode(Sha256::digest(key.as_bytes()))
}

/// A freshly generated key and the digest to configure for it.
#[derive(Debug)]
pub struct GeneratedApiKey {
    pub key: String,
    pub digest: String,
}

pub fn generate_api_key() -> Result<GeneratedApiKey, SecretError> {
    let key = generate_token(TOKEN_BYTES)?;
    let digest = digest_key(&key);
    Ok(GeneratedApiKey { key, digest })
}

/// API key gate failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyError {
    /// No key in the request.
    Missing,
    /// A key was supplied and is wrong.
    Invalid,
    /// The gate has no usable digest.
    Unavailable,
    /// The configured digest cannot be decoded.
    MalformedDigest(String),
}

impl ApiKeyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing => StatusCode::UNAUTHORIZED,
            Self::Invalid | Self::Unavailable => StatusCode::FORBIDDEN,
            Self::MalformedDigest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body text shown to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Missing => "API key required",
            Self::Invalid => "Invalid API key",
            Self::Unavailable | Self::MalformedDigest(_) => API_UNAVAILABLE,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing_api_key",
            Self::Invalid => "invalid_api_key",
            Self::Unavailable => "api_locked",
            Self::MalformedDigest(_) => "malformed_digest",
        }
    }
}

impl fmt::Display for ApiKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "No API key supplied"),
            Self::Invalid => write!(f, "API key does not match"),
            Self::Unavailable => write!(f, "API key gate is not configured"),
            Self::MalformedDigest(msg) => write!(f, "Malformed API key digest: {}", msg),
        }
    }
}

impl std::error::Error for ApiKeyError {}
