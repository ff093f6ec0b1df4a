//! Webhook signing and verification: HMAC-SHA256 over a timestamp and
//! body, with a bounded replay window on verification.

use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Header name carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-RAXE-Signature";
/// Header name carrying the unix-seconds timestamp the signature was made
/// over.
pub const TIMESTAMP_HEADER: &str = "X-RAXE-Timestamp";

/// Errors raised while signing or verifying a webhook payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    /// The signature doesn't start with `sha256=`.
    #[error("signature format invalid: missing 'sha256=' prefix")]
    MissingPrefix,
    /// The part after the prefix isn't valid lowercase hex.
    #[error("signature format invalid: not a valid hex digest")]
    InvalidHex,
    /// HMAC comparison failed — body, secret, or timestamp don't match.
    #[error("signature invalid: mismatch")]
    Mismatch,
    /// The timestamp is further in the past than `max_age_seconds` allows.
    #[error("timestamp expired: {age_seconds}s old, max age {max_age_seconds}s")]
    Expired {
        /// How old the timestamp is, in seconds.
        age_seconds: i64,
        /// The configured maximum age.
        max_age_seconds: u64,
    },
    /// The timestamp is in the future beyond tolerance.
    #[error("timestamp is in the future: {skew_seconds}s ahead")]
    FutureTimestamp {
        /// How far ahead of now the timestamp is, in seconds.
        skew_seconds: i64,
    },
    /// A required header was missing when verifying from a header map.
    #[error("missing required header: {0}")]
    MissingHeader(String),
}

fn signed_message(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut msg = format!("{timestamp}.").into_bytes();
    msg.extend_from_slice(body);
    msg
}

/// Compute `sha256=<hex>` over `{timestamp}.{body}` using `secret` as the
/// HMAC key.
#[must_use]
pub fn generate_webhook_signature(body: &[u8], secret: &str, timestamp: i64) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, &signed_message(timestamp, body));
    format!("sha256={}", crate::model::to_hex(tag.as_ref()))
}

/// Verify a `sha256=<hex>` signature against `body`/`secret`/`timestamp`,
/// enforcing a replay window of `max_age_seconds` in both directions.
///
/// # Errors
///
/// Returns the specific [`WebhookError`] variant describing why
/// verification failed.
pub fn verify_webhook_signature(
    body: &[u8],
    signature: &str,
    timestamp: i64,
    secret: &str,
    max_age_seconds: u64,
) -> Result<(), WebhookError> {
    let hex_part = signature.strip_prefix("sha256=").ok_or(WebhookError::MissingPrefix)?;
    let expected_tag = crate::model::from_hex(hex_part).map_err(|_| WebhookError::InvalidHex)?;

    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64;

    let age = now - timestamp;
    if age > max_age_seconds as i64 {
        return Err(WebhookError::Expired { age_seconds: age, max_age_seconds });
    }
    if -age > max_age_seconds as i64 {
        return Err(WebhookError::FutureTimestamp { skew_seconds: -age });
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, &signed_message(timestamp, body), &expected_tag).map_err(|_| WebhookError::Mismatch)
}

/// Higher-level signer bundling a secret with sign/verify/header helpers
/// (mirrors the original's `WebhookSigner` class).
pub struct WebhookSigner {
    secret: String,
    max_age_seconds: u64,
}

impl WebhookSigner {
    /// Construct a signer with the given HMAC secret and replay window.
    #[must_use]
    pub fn new(secret: impl Into<String>, max_age_seconds: u64) -> Self {
        Self { secret: secret.into(), max_age_seconds }
    }

    /// Sign `body` with the current unix timestamp.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> (i64, String) {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64;
        let signature = generate_webhook_signature(body, &self.secret, timestamp);
        (timestamp, signature)
    }

    /// Sign `body`, returning the two headers a webhook dispatch would set.
    #[must_use]
    pub fn signature_headers(&self, body: &[u8]) -> Vec<(&'static str, String)> {
        let (timestamp, signature) = self.sign(body);
        vec![(SIGNATURE_HEADER, signature), (TIMESTAMP_HEADER, timestamp.to_string())]
    }

    /// Verify `body`/`signature`/`timestamp` against this signer's secret
    /// and replay window.
    ///
    /// # Errors
    ///
    /// See [`verify_webhook_signature`].
    pub fn verify(&self, body: &[u8], signature: &str, timestamp: i64) -> Result<(), WebhookError> {
        verify_webhook_signature(body, signature, timestamp, &self.secret, self.max_age_seconds)
    }

    /// Verify using a header map (`X-RAXE-Signature` / `X-RAXE-Timestamp`).
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::MissingHeader`] if either header is absent,
    /// otherwise see [`verify_webhook_signature`].
    pub fn verify_from_headers(&self, body: &[u8], headers: &std::collections::HashMap<String, String>) -> Result<(), WebhookError> {
        let signature = headers.get(SIGNATURE_HEADER).ok_or_else(|| WebhookError::MissingHeader(SIGNATURE_HEADER.to_string()))?;
        let timestamp_raw = headers.get(TIMESTAMP_HEADER).ok_or_else(|| WebhookError::MissingHeader(TIMESTAMP_HEADER.to_string()))?;
        let timestamp: i64 = timestamp_raw.parse().map_err(|_| WebhookError::MissingHeader(TIMESTAMP_HEADER.to_string()))?;
        self.verify(body, signature, timestamp)
    }
}
