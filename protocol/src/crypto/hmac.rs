//! # Envelope HMAC
//!
//! When a cookie is set on a `NetKernel`, every outbound envelope carries a
//! `checkSum`: `HMAC-SHA256(cookie, JSON(envelope minus checkSum))`, hex
//! encoded. Every inbound envelope is re-verified the same way; a mismatch
//! is treated as a dropped, unauthenticated message (see
//! `transport::kernel::NetKernel::cookie`).
//!
//! Follows the same `Hmac<Sha256>` + `verify_slice` pattern used elsewhere
//! in this lineage for bearer-token signing — `verify_slice` runs in
//! constant time, so no separate constant-time-compare dependency is needed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum HmacError {
    #[error("cookie is not a valid HMAC key")]
    InvalidKey,
    #[error("checkSum mismatch: sent {sent}, calculated {calculated}")]
    Mismatch { sent: String, calculated: String },
    #[error("envelope carries no checkSum to verify")]
    Missing,
}

/// Computes the hex-encoded `checkSum` for `body` (the envelope JSON with
/// `checkSum` omitted) under `cookie`.
pub fn sign_envelope(cookie: &str, body: &[u8]) -> Result<String, HmacError> {
    let mut mac = HmacSha256::new_from_slice(cookie.as_bytes()).map_err(|_| HmacError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies `sent_check_sum` against `body` under `cookie`. Returns the
/// `{sent, calculated}` pair on mismatch, as spec requires for `skip`
/// observability.
pub fn verify_envelope(cookie: &str, body: &[u8], sent_check_sum: &str) -> Result<(), HmacError> {
    let mut mac = HmacSha256::new_from_slice(cookie.as_bytes()).map_err(|_| HmacError::InvalidKey)?;
    mac.update(body);
    let sent_bytes = hex::decode(sent_check_sum).map_err(|_| HmacError::Mismatch {
        sent: sent_check_sum.to_string(),
        calculated: sign_envelope(cookie, body).unwrap_or_default(),
    })?;
    mac.verify_slice(&sent_bytes).map_err(|_| HmacError::Mismatch {
        sent: sent_check_sum.to_string(),
        calculated: sign_envelope(cookie, body).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let body = br#"{"id":"s"}"#;
        let checksum = sign_envelope("secret", body).unwrap();
        assert!(verify_envelope("secret", body, &checksum).is_ok());
    }

    #[test]
    fn tampering_with_a_single_byte_fails_verification() {
        let body = br#"{"id":"s"}"#;
        let mut checksum = sign_envelope("secret", body).unwrap();
        let last = checksum.pop().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        checksum.push(flipped);
        assert!(verify_envelope("secret", body, &checksum).is_err());
    }

    #[test]
    fn wrong_cookie_fails_verification() {
        let body = br#"{"id":"s"}"#;
        let checksum = sign_envelope("secret", body).unwrap();
        assert!(verify_envelope("other-secret", body, &checksum).is_err());
    }
}
