//! The certificate model.
//!
//! An [`Identity`] is the unsigned statement "this public key belongs to
//! this user id, as of this time". Its canonical serialization is the
//! [`Certificate`]; a trust root's detached [`Signature`] over those bytes
//! makes it checkable by anyone who trusts the root.
//!
//! Certificate JSON fields, in order:
//! - public_key: text (PKCS#1 PEM)
//! - user_id: integer
//! - timestamp: integer (unix seconds, informational only)

use std::time::{SystemTime, UNIX_EPOCH};

use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use crate::encoding::{self, public_key_from_pem, public_key_to_pem, to_canonical_json};
use crate::error::Result;
use crate::hash::Fingerprint;

#[derive(Serialize)]
struct CertificateFields<'a> {
    public_key: &'a str,
    user_id: u64,
    timestamp: u64,
}

#[derive(Deserialize)]
struct OwnedCertificateFields {
    public_key: String,
    user_id: u64,
    timestamp: u64,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The payload a certificate binds together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Subject's public key.
    pub public_key: RsaPublicKey,
    /// Numeric identity assigned by the issuer.
    pub user_id: u64,
    /// Issuance time (unix seconds). Not checked by verification.
    pub issued_at: u64,
}

impl Identity {
    pub fn new(public_key: RsaPublicKey, user_id: u64, issued_at: u64) -> Self {
        Self {
            public_key,
            user_id,
            issued_at,
        }
    }

    /// Identity stamped with the current time.
    pub fn issued_now(public_key: RsaPublicKey, user_id: u64) -> Self {
        Self::new(public_key, user_id, unix_now())
    }

    /// Encode to the canonical certificate bytes. These are what get signed.
    pub fn to_certificate(&self) -> Result<Certificate> {
        let pem = public_key_to_pem(&self.public_key)?;
        let bytes = to_canonical_json(&CertificateFields {
            public_key: &pem,
            user_id: self.user_id,
            timestamp: self.issued_at,
        })?;
        Ok(Certificate(bytes))
    }

    /// Decode certificate bytes. Does not check any signature.
    pub fn from_certificate(certificate: &Certificate) -> Result<Self> {
        let fields: OwnedCertificateFields = serde_json::from_slice(certificate.as_bytes())?;
        Ok(Self {
            public_key: public_key_from_pem(&fields.public_key)?,
            user_id: fields.user_id,
            issued_at: fields.timestamp,
        })
    }

    /// Fingerprint of the subject key.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Fingerprint::of_public_key(&self.public_key)
    }

    /// Seconds between issuance and `now`, zero if issued in the future.
    pub fn age_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.issued_at)
    }
}

/// Canonical certificate bytes, immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    /// Wrap bytes received from a peer or read from disk.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The certificate as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

/// A detached RSA-SHA512 signature over certificate bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode the base64 text form.
    pub fn from_text(text: &str) -> std::result::Result<Self, base64::DecodeError> {
        encoding::signature_from_text(text).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 text form, as stored in `.pem` files and served over HTTP.
    pub fn to_text(&self) -> String {
        encoding::signature_to_text(&self.0)
    }
}
