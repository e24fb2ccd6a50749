//! HMAC-SHA256 request and response signatures.
//!
//! The signature is the base64 of `HMAC-SHA256(key, body)` over the bytes as
//! they travel on the wire, carried in the [`HASH_HEADER`] header.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const HASH_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
#[error("signing key rejected by HMAC")]
pub struct InvalidKey;

/// Signs `body` with `key`.
///
/// # Examples
///
/// ```
/// use rtmon_common::signing::{sign, verify};
///
/// let sig = sign(b"secret", b"[]").unwrap();
/// assert!(verify(b"secret", b"[]", &sig));
/// assert!(!verify(b"other", b"[]", &sig));
/// ```
pub fn sign(key: &[u8], body: &[u8]) -> Result<String, InvalidKey> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| InvalidKey)?;
    mac.update(body);
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Checks `signature` against `body` in constant time. Malformed base64 is a
/// mismatch.
pub fn verify(key: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
