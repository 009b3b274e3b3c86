//! RFC 7636 proof key for code exchange (S256 only).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::auth::secret::{SecretError, TOKEN_BYTES, generate_token};
use crate::types::PkceVerifier;

/// Value of the `code_challenge_method` parameter.
pub const CHALLENGE_METHOD: &str = "S256";

/// Fresh verifier with 32 octets of randomness (43 base64url characters).
pub fn generate_verifier() -> Result<PkceVerifier, SecretError> {
    Ok(PkceVerifier::new(generate_token(TOKEN_BYTES)?))
}

/// `BASE64URL(SHA256(verifier))`
pub fn challenge(verifier: &PkceVerifier) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_str().as_bytes()))
}
