//! Webhook signature verification.
//!
//! The form provider signs every delivery with HMAC-SHA256 over the raw body
//! and sends the result as `sha256=<base64 digest>` in a request header.
//! Verification must run on the exact bytes received: re-serialising the JSON
//! first changes the bytes and invalidates the signature.
//!
//! # Security
//!
//! When no secret is configured, verification is disabled and every delivery
//! is accepted with a `WARN` log line. This permissive fallback exists for
//! local and staging environments and is a known weakening of security;
//! production deployments must configure a secret.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Prefix carried by every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Shared secret used to verify delivery signatures.
///
/// The value is zeroized on drop and never appears in `Debug` output.
#[derive(Clone)]
pub struct WebhookSecret(Zeroizing<String>);

impl WebhookSecret {
    /// Wrap a raw secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Wrap a secret, treating an empty or whitespace-only value as absent.
    pub fn from_optional(value: Option<String>) -> Option<Self> {
        value
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WebhookSecret").field(&"<REDACTED>").finish()
    }
}

/// Failures while computing a signature.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("secret cannot be used as HMAC key")]
    InvalidKey,
}

/// Compute the signature header value for `body`.
///
/// Returns `sha256=` followed by the standard base64 encoding of
/// HMAC-SHA256(secret, body).
pub fn sign_payload(body: &[u8], secret: &WebhookSecret) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    Ok(format!("{}{}", SIGNATURE_PREFIX, STANDARD.encode(digest)))
}

/// Verify a delivery signature.
///
/// # Behaviour
///
/// - No secret configured: returns `true` (verification disabled, logged at `WARN`).
/// - Secret configured but no header: returns `false`.
/// - Otherwise the header is trimmed and compared in constant time against
///   the computed value. A length mismatch returns `false` before the
///   comparison; the length alone reveals nothing about the secret.
///
/// Any failure while computing the expected value counts as a mismatch.
pub fn verify_signature(
    body: &[u8],
    header: Option<&str>,
    secret: Option<&WebhookSecret>,
) -> bool {
    let Some(secret) = secret else {
        warn!("Webhook secret not configured - signature verification is disabled");
        return true;
    };

    let Some(header) = header else {
        debug!("Signature header missing");
        return false;
    };

    let expected = match sign_payload(body, secret) {
        Ok(expected) => expected,
        Err(e) => {
            warn!(error = %e, "Could not compute expected signature");
            return false;
        }
    };

    let provided = header.trim();
    if provided.len() != expected.len() {
        return false;
    }

    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Signature verification bound to the configured secret.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    secret: Option<WebhookSecret>,
}

impl SignatureVerifier {
    /// Create a verifier; `None` disables verification.
    pub fn new(secret: Option<WebhookSecret>) -> Self {
        if secret.is_none() {
            warn!(
                "SignatureVerifier created without a secret - \
                 every delivery will be accepted. Configure a secret before production use."
            );
        }
        Self { secret }
    }

    /// Whether a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `body` against the optional signature header.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> bool {
        verify_signature(body, header, self.secret.as_ref())
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
