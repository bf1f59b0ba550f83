//! BLAKE3 fingerprints for public keys.
//!
//! `fingerprint = BLAKE3(pkcs1_der(public_key))`

use rsa::RsaPublicKey;
use rsa::pkcs1::EncodeRsaPublicKey;

use crate::error::{Error, Result};

/// Length of a BLAKE3 hash output in bytes (256 bits).
pub const HASH_LEN: usize = 32;

/// Number of bytes shown by [`Fingerprint::short`].
const SHORT_LEN: usize = 8;

/// A public key fingerprint (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; HASH_LEN]);

impl Fingerprint {
    /// Compute BLAKE3 hash of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        let h = blake3::hash(data);
        Self(*h.as_bytes())
    }

    /// Fingerprint a public key over its PKCS#1 DER encoding.
    pub fn of_public_key(key: &RsaPublicKey) -> Result<Self> {
        let der = key
            .to_pkcs1_der()
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self::digest(der.as_bytes()))
    }

    /// Get the raw bytes of this fingerprint.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First eight bytes as hex, for log lines.
    pub fn short(&self) -> String {
        self.0[..SHORT_LEN].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
