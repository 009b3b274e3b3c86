//! Cryptographically secure token generation.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Bytes of randomness behind session tokens, state values and PKCE verifiers.
pub const TOKEN_BYTES: usize = 32;

/// Generate `byte_length` bytes from the OS random source, base64url encoded
/// without padding.
///
/// There is no fallback: if the OS source fails the error is returned and the
/// caller must abort whatever credential it was minting.
pub fn generate_token(byte_length: usize) -> Result<String, SecretError> {
    if byte_length == 0 {
        return Err(SecretError::InvalidLength);
    }

    let mut bytes = vec![0u8; byte_length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SecretError::RandomSource(e.to_string()))?;

    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// Errors from the secret generator.
#[derive(Debug, Clone)]
pub enum SecretError {
    /// The OS random source could not be read.
    RandomSource(String),
    /// A zero-length token was requested.
    InvalidLength,
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RandomSource(msg) => write!(f, "Secure random source unavailable: {}", msg),
            Self::InvalidLength => write!(f, "Token length must be non-zero"),
        }
    }
}

impl std::error::Error for SecretError {}
