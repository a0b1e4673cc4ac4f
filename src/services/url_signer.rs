//! HMAC-SHA256 signatures for time-limited object URLs.
//!
//! Signed payload is `{bucket}/{key}:{exp}` where `exp` is a unix timestamp.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signed URL expired")]
    Expired,
    #[error("invalid signature")]
    Invalid,
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, bucket: &str, key: &str, exp: i64) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
        mac.update(format!("{}/{}:{}", bucket, key, exp).as_bytes());
        mac
    }

    /// Returns `(exp, sig_hex)` for an object valid `ttl_secs` from now.
    pub fn sign(&self, bucket: &str, key: &str, ttl_secs: u64) -> (i64, String) {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let exp = Utc::now().timestamp().saturating_add(ttl);
        let sig = hex::encode(self.mac(bucket, key, exp).finalize().into_bytes());
        (exp, sig)
    }

    /// Check expiry first, then the signature in constant time.
    pub fn verify(&self, bucket: &str, key: &str, exp: i64, sig: &str) -> Result<(), SignatureError> {
        if Utc::now().timestamp() > exp {
            return Err(SignatureError::Expired);
        }
        let provided = hex::decode(sig).map_err(|_| SignatureError::Invalid)?;
        self.mac(bucket, key, exp)
            .verify_slice(&provided)
            .map_err(|_| SignatureError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret-key")
    }

    #[test]
    fn signature_round_trips() {
        let signer = signer();
        let (exp, sig) = signer.sign("videos", "videos/abc/chunk_00000", 3600);
        assert!(exp > Utc::now().timestamp());
        assert_eq!(sig.len(), 64);
        assert!(signer.verify("videos", "videos/abc/chunk_00000", exp, &sig).is_ok());
    }

    #[test]
    fn tampered_key_or_expiry_is_rejected() {
        let signer = signer();
        let (exp, sig) = signer.sign("videos", "videos/abc/chunk_00000", 3600);
        assert_eq!(
            signer.verify("videos", "videos/abc/chunk_00001", exp, &sig),
            Err(SignatureError::Invalid)
        );
        assert_eq!(
            signer.verify("videos", "videos/abc/chunk_00000", exp + 60, &sig),
            Err(SignatureError::Invalid)
        );
        assert_eq!(
            signer.verify("videos", "videos/abc/chunk_00000", exp, "zz"),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn other_secret_is_rejected() {
        let (exp, sig) = signer().sign("videos", "k", 60);
        assert_eq!(
            UrlSigner::new("another").verify("videos", "k", exp, &sig),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn expired_url_is_rejected() {
        let signer = signer();
        let exp = Utc::now().timestamp() - 1;
        let sig = hex::encode(signer.mac("videos", "k", exp).finalize().into_bytes());
        assert_eq!(signer.verify("videos", "k", exp, &sig), Err(SignatureError::Expired));
    }
}
