//! Local password check for the configured user.
//!
//! Digests are stored as `{scheme}hash`. Only `{bcrypt}` is recognised;
//! anything else never matches.

use std::fmt;

/// Scheme tag in front of a bcrypt digest.
pub const BCRYPT_PREFIX: &str = "{bcrypt}";

pub const MIN_PASSWORD_LEN: usize = 4;
pub const MAX_PASSWORD_LEN: usize = 64;

/// Whether `candidate` matches the tagged digest. Fails closed.
pub fn check_password(configured_hash: &str, candidate: &str) -> bool {
    let Some(digest) = configured_hash.strip_prefix(BCRYPT_PREFIX) else {
        return false;
    };
    bcrypt::verify(candidate, digest).unwrap_or(false)
}

/// Hash a plaintext password at the default cost, tagged for configuration.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_cost(password, bcrypt::DEFAULT_COST)
}

pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, PasswordError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(PasswordError::InvalidLength(len));
    }

    let digest = bcrypt::hash(password, cost).map_err(|e| PasswordError::Hash(e.to_string()))?;
    Ok(format!("{}{}", BCRYPT_PREFIX, digest))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    InvalidLength(usize),
    Hash(String),
}

impl fmt::Display for PasswordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => write!(
                f,
                "Password must be {}-{} characters, got {}",
                MIN_PASSWORD_LEN, MAX_PASSWORD_LEN, len
            ),
            Self::Hash(msg) => write!(f, "Failed to hash password: {}", msg),
        }
    }
}

impl std::error::Error for PasswordError {}
