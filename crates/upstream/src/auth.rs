//! L2 request signing for authenticated CLOB endpoints.
//!
//! The CLOB authenticates requests with an HMAC-SHA256 over
//! `{timestamp}{method}{path_with_query}{body}`, keyed by the base64url
//! secret issued with the API key. Secrets seen in the wild are not always
//! canonical base64url, so the decode is tolerant: `-`/`_` are mapped back to
//! `+`/`/`, anything outside the base64 alphabet is stripped, and padding is
//! kept. The signature itself is emitted as padded base64url.

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE},
    Engine,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use mirror_core::ClobCredentials;
use sha2::Sha256;
use thiserror::Error;

use crate::error::ClientError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),
}

impl From<SignError> for ClientError {
    fn from(err: SignError) -> Self {
        ClientError::Validation {
            issues: vec![err.to_string()],
        }
    }
}

/// Signs requests with CLOB L2 credentials.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: ClobCredentials,
}

impl RequestSigner {
    #[must_use]
    pub fn new(credentials: ClobCredentials) -> Self {
        Self { credentials }
    }

    /// Produces the `POLY_*` headers for one request, stamped with the
    /// current time in seconds.
    ///
    /// # Errors
    /// Returns an error if the configured secret cannot be decoded.
    pub fn headers(
        &self,
        method: &str,
        path_with_query: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, SignError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, method, path_with_query, body)?;
        Ok(vec![
            ("POLY_ADDRESS", self.credentials.address.clone()),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_API_KEY", self.credentials.api_key.clone()),
            ("POLY_PASSPHRASE", self.credentials.passphrase.clone()),
        ])
    }

    /// Computes the signature for explicit inputs.
    ///
    /// # Errors
    /// Returns an error if the configured secret cannot be decoded.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path_with_query: &str,
        body: &str,
    ) -> Result<String, SignError> {
        let key = decode_secret(&self.credentials.secret)?;

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| SignError::InvalidSecret(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path_with_query.as_bytes());
        mac.update(body.as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }
}

/// Tolerant base64url decode of the shared secret.
fn decode_secret(secret: &str) -> Result<Vec<u8>, SignError> {
    let normalized: String = secret
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();

    STANDARD
        .decode(&normalized)
        .or_else(|_| STANDARD_NO_PAD.decode(normalized.trim_end_matches('=')))
        .map_err(|e| SignError::InvalidSecret(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer_with_secret(secret: &str) -> RequestSigner {
        RequestSigner::new(ClobCredentials {
            address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            api_key: "test-api-key".to_string(),
            secret: secret.to_string(),
            passphrase: "test-passphrase".to_string(),
        })
    }

    #[test]
    fn signature_is_deterministic() {
        let signer = signer_with_secret(&URL_SAFE.encode(b"test-secret-key-bytes"));
        let a = signer.sign("1700000000", "GET", "/markets/0xabc", "").unwrap();
        let b = signer.sign("1700000000", "GET", "/markets/0xabc", "").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signature_covers_every_message_part() {
        let signer = signer_with_secret(&URL_SAFE.encode(b"test-secret-key-bytes"));
        let base = signer.sign("1700000000", "GET", "/trades", "").unwrap();

        assert_ne!(base, signer.sign("1700000001", "GET", "/trades", "").unwrap());
        assert_ne!(base, signer.sign("1700000000", "POST", "/trades", "").unwrap());
        assert_ne!(
            base,
            signer.sign("1700000000", "GET", "/trades?limit=1", "").unwrap()
        );
        assert_ne!(base, signer.sign("1700000000", "GET", "/trades", "{}").unwrap());
    }

    #[test]
    fn signature_is_padded_urlsafe_base64() {
        let signer = signer_with_secret(&URL_SAFE.encode(b"mysecret"));
        let sig = signer.sign("1000", "GET", "/test", "").unwrap();

        assert!(!sig.contains('+'));
        assert!(!sig.contains('/'));
        // SHA-256 output is 32 bytes: 44 base64 characters ending in '='.
        assert_eq!(sig.len(), 44);
        assert!(sig.ends_with('='));
        assert!(URL_SAFE.decode(&sig).is_ok());
    }

    #[test]
    fn decode_tolerates_standard_alphabet_secret() {
        let standard = STANDARD.encode(b"bytes+that/pad=");
        let url_safe = URL_SAFE.encode(b"bytes+that/pad=");
        assert_eq!(
            decode_secret(&standard).unwrap(),
            decode_secret(&url_safe).unwrap()
        );
    }

    #[test]
    fn decode_strips_foreign_characters() {
        let clean = URL_SAFE.encode(b"hello-secret");
        let noisy = format!(" {} \n", clean);
        assert_eq!(decode_secret(&noisy).unwrap(), decode_secret(&clean).unwrap());
    }

    #[test]
    fn decode_of_only_foreign_characters_is_empty() {
        assert_eq!(decode_secret("@@@ !!").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn headers_include_all_five() {
        let signer = signer_with_secret(&URL_SAFE.encode(b"test-secret-key-bytes"));
        let headers = signer.headers("GET", "/markets/0xabc", "").unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "POLY_ADDRESS",
                "POLY_SIGNATURE",
                "POLY_TIMESTAMP",
                "POLY_API_KEY",
                "POLY_PASSPHRASE"
            ]
        );
        let timestamp = &headers[2].1;
        assert!(timestamp.parse::<i64>().is_ok());
    }
}
