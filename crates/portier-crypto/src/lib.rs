use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

mod access;

pub use access::{AccessClaims, AccessSigner};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid password hash parameters")]
    InvalidParams(argon2::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("malformed access token")]
    MalformedToken,
    #[error("access token signature mismatch")]
    BadSignature,
    #[error("access token expired")]
    Expired,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

// ──────────────────────────────────────────────────────────────────────────────
// Opaque secrets
// ──────────────────────────────────────────────────────────────────────────────

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of confirmation tokens: 32 base36 characters ≈ 165 bits.
pub const CONFIRMATION_TOKEN_LEN: usize = 32;

/// Session secrets are 256 bits of randomness.
pub const SESSION_SECRET_BYTES: usize = 32;

/// Generate a confirmation token: lowercase base36, safe as a URL path segment.
pub fn generate_confirmation_token() -> String {
    let mut rng = OsRng;
    (0..CONFIRMATION_TOKEN_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// Generate a session secret, encoded URL-safe base64 without padding (cookie value).
pub fn generate_session_secret() -> String {
    let mut bytes = Zeroizing::new([0u8; SESSION_SECRET_BYTES]);
    OsRng.fill_bytes(bytes.as_mut());
    URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

// ──────────────────────────────────────────────────────────────────────────────
// Hashing utilities
// ──────────────────────────────────────────────────────────────────────────────

/// Hash data with SHA256.
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest stored in place of a session secret: hex(sha256(secret)).
///
/// Unsalted on purpose: the input is already a uniformly random 256-bit value.
pub fn hash_session_secret(secret: &str) -> String {
    hex::encode(hash_sha256(secret.as_bytes()))
}

// ──────────────────────────────────────────────────────────────────────────────
// Passwords
// ──────────────────────────────────────────────────────────────────────────────

const PASSWORD_MEMORY_COST_KIB: u32 = 19 * 1024;
const PASSWORD_T_COST: u32 = 2;

fn password_hasher() -> Result<argon2::Argon2<'static>, CryptoError> {
    let params = argon2::Params::new(PASSWORD_MEMORY_COST_KIB, PASSWORD_T_COST, 1, None)
        .map_err(CryptoError::InvalidParams)?;
    Ok(argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params,
    ))
}

/// Hash a user password into a PHC string (argon2id, random 16-byte salt).
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;

    let hash = password_hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC string. A malformed stored hash is an error,
/// a wrong password is `Ok(false)`.
pub fn verify_password(password: &str, phc: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(phc).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(password_hasher()?
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn confirmation_token_shape() {
        let token = generate_confirmation_token();
        assert_eq!(token.len(), CONFIRMATION_TOKEN_LEN);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn confirmation_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_confirmation_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn session_secret_is_256_bits_url_safe() {
        let secret = generate_session_secret();
        // 32 bytes -> 43 chars without padding
        assert_eq!(secret.len(), 43);
        assert!(!secret.contains('='));
        assert!(!secret.contains('+') && !secret.contains('/'));
        assert_eq!(URL_SAFE_NO_PAD.decode(&secret).unwrap().len(), 32);
    }

    #[test]
    fn session_digest_is_hex_sha256() {
        let digest = hash_session_secret("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_session_secret("abc"), digest);
        assert_ne!(hash_session_secret("abd"), digest);
    }

    #[test]
    fn password_hash_roundtrip() {
        let phc = hash_password("correct horse").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &phc).unwrap());
        assert!(!verify_password("wrong horse", &phc).unwrap());
    }

    #[test]
    fn password_hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }
}
