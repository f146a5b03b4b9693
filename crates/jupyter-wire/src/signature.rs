//! HMAC signing of message payload frames.
//!
//! Every wire message carries a hex-encoded keyed digest over its four JSON
//! parts. An empty key disables signing entirely: the signature frame is
//! present but empty and verification is skipped.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::WireError;

type HmacSha256 = Hmac<Sha256>;

/// Digest algorithms we implement. The connection file names the scheme,
/// e.g. `"hmac-sha256"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
}

impl SignatureScheme {
    pub fn parse(name: &str) -> Result<Self, WireError> {
        match name {
            "hmac-sha256" => Ok(SignatureScheme::HmacSha256),
            other => Err(WireError::UnsupportedScheme(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::HmacSha256 => "hmac-sha256",
        }
    }
}

/// Computes and verifies the keyed digest over message parts.
///
/// Shared read-only across channel loops; constructed once at startup from
/// the connection file's scheme and key.
#[derive(Debug, Clone)]
pub struct Signer {
    scheme: SignatureScheme,
    /// `None` when signing is disabled (empty key).
    key: Option<Vec<u8>>,
}

impl Signer {
    pub fn new(scheme: &str, key: &str) -> Result<Self, WireError> {
        let scheme = SignatureScheme::parse(scheme)?;
        let key = if key.is_empty() {
            None
        } else {
            // Reject keys HMAC itself would reject, up front.
            HmacSha256::new_from_slice(key.as_bytes())
                .map_err(|e| WireError::InvalidKey(e.to_string()))?;
            Some(key.as_bytes().to_vec())
        };
        Ok(Signer { scheme, key })
    }

    /// A signer with signing disabled.
    pub fn unsigned() -> Self {
        Signer {
            scheme: SignatureScheme::HmacSha256,
            key: None,
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Hex digest over the given parts, in order. Empty string when signing
    /// is disabled.
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        let Some(key) = &self.key else {
            return String::new();
        };
        // Key validity was checked in `new`.
        let mut mac = HmacSha256::new_from_slice(key).expect("key length already validated");
        for part in parts {
            mac.update(part);
        }
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a received signature against the recomputed digest, in
    /// constant time. Always true when signing is disabled.
    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> bool {
        if self.key.is_none() {
            return true;
        }
        let expected = self.sign(parts);
        expected.as_bytes().ct_eq(signature).into()
    }
}
