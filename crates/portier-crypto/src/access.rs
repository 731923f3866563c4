//! Short-lived access credentials: compact HS256 JWTs.
//!
//! The access credential authorizes a single request window. It is minted from a
//! long-lived session and is never stored server-side.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const MIN_KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims carried by an access credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies access credentials with one symmetric key.
#[derive(Clone)]
pub struct AccessSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for AccessSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl AccessSigner {
    pub fn new(key: &[u8], ttl: Duration) -> Result<Self, CryptoError> {
        if key.len() < MIN_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "need at least {} bytes, got {}",
                MIN_KEY_LEN,
                key.len()
            )));
        }
        Ok(Self {
            key: key.to_vec(),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sign(&self, subject: &str, now: DateTime<Utc>) -> Result<String, CryptoError> {
        let header = Header {
            alg: "HS256".into(),
            typ: "JWT".into(),
        };
        let claims = AccessClaims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        let header = serde_json::to_vec(&header).map_err(|_| CryptoError::MalformedToken)?;
        let claims = serde_json::to_vec(&claims).map_err(|_| CryptoError::MalformedToken)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Verify signature and expiry. The signature check is constant-time.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, CryptoError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::MalformedToken);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(CryptoError::MalformedToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| CryptoError::MalformedToken)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CryptoError::BadSignature)?;

        let claims: AccessClaims = decode_segment(claims_b64)?;
        if claims.exp <= now.timestamp() {
            return Err(CryptoError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| CryptoError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| CryptoError::MalformedToken)
}
