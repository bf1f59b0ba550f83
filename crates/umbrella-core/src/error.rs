//! Error types for umbrella-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from key storage, issuance, and identity lookups.
///
/// Everything except [`Error::NotFound`] indicates a broken local state
/// (missing trust anchor, damaged key files, bad local input) and is
/// treated as fatal by the node.
#[derive(Debug, Error)]
pub enum Error {
    #[error("trust anchor missing: no root key at {0}")]
    TrustAnchorMissing(PathBuf),

    #[error("key material missing: {0}")]
    KeyMaterialMissing(PathBuf),

    #[error("key material corrupt: {path}: {reason}")]
    KeyMaterialCorrupt { path: PathBuf, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("freshly issued signature failed self-verification")]
    SelfVerificationFailed,

    #[error("no {what} for user id {user_id:x}")]
    NotFound { what: &'static str, user_id: u64 },

    #[error("invalid user id {0:?}: expected hexadecimal")]
    InvalidUserId(String),

    #[error("timed out waiting for key lock at {0}")]
    LockTimeout(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error means "nothing stored under that id" rather than
    /// a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Outcome of checking a certificate against a trusted key.
///
/// These are ordinary results: a failed check means "do not trust this
/// peer", never a crash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("signature does not match certificate under the trusted key")]
    SignatureInvalid,

    #[error("signed certificate is malformed: {0}")]
    CertificateMalformed(String),
}

/// Result type alias for umbrella-core operations.
pub type Result<T> = std::result::Result<T, Error>;
