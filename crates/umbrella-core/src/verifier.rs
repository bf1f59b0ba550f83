//! Certificate verification.
//!
//! Verification is purely cryptographic: the detached signature must be a
//! valid RSA-SHA512 signature over the exact certificate bytes under a key
//! the caller already trusts. Freshness and user-id policy are left to the
//! caller, who gets the decoded [`Identity`] back on success.

use rsa::RsaPublicKey;
use tracing::debug;

use crate::certificate::{Certificate, Identity, Signature};
use crate::error::VerificationError;
use crate::hash::Fingerprint;
use crate::signing;

/// A named public key the caller is willing to trust.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub name: String,
    pub key: RsaPublicKey,
}

/// The set of keys a verifier accepts signatures from.
///
/// Today a node trusts exactly one root; the set exists so that adding or
/// rotating roots does not touch verification code.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: Vec<TrustedKey>,
}

impl TrustedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single-root trust set.
    pub fn root(key: RsaPublicKey) -> Self {
        let mut keys = Self::new();
        keys.insert("root", key);
        keys
    }

    /// Trust `key` under `name`, replacing any key previously trusted under it.
    pub fn insert(&mut self, name: impl Into<String>, key: RsaPublicKey) {
        let name = name.into();
        self.keys.retain(|k| k.name != name);
        self.keys.push(TrustedKey { name, key });
    }

    pub fn remove(&mut self, name: &str) -> Option<TrustedKey> {
        let pos = self.keys.iter().position(|k| k.name == name)?;
        Some(self.keys.remove(pos))
    }

    pub fn get(&self, name: &str) -> Option<&RsaPublicKey> {
        self.keys.iter().find(|k| k.name == name).map(|k| &k.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustedKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A certificate accepted under one of the trusted keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub identity: Identity,
    /// Name of the trusted key that signed it.
    pub signer: String,
}

/// Stateless certificate checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    /// Check `signature` over `certificate` under `trusted_key` and decode it.
    pub fn verify(
        certificate: &Certificate,
        signature: &Signature,
        trusted_key: &RsaPublicKey,
    ) -> Result<Identity, VerificationError> {
        signing::verify(trusted_key, certificate.as_bytes(), signature.as_bytes())?;
        Identity::from_certificate(certificate)
            .map_err(|e| VerificationError::CertificateMalformed(e.to_string()))
    }

    /// Check against every trusted key, accepting the first that verifies.
    pub fn verify_trusted(
        certificate: &Certificate,
        signature: &Signature,
        trusted: &TrustedKeys,
    ) -> Result<Verified, VerificationError> {
        for candidate in trusted.iter() {
            match Self::verify(certificate, signature, &candidate.key) {
                Ok(identity) => {
                    return Ok(Verified {
                        identity,
                        signer: candidate.name.clone(),
                    });
                }
                Err(VerificationError::SignatureInvalid) => {
                    if let Ok(fp) = Fingerprint::of_public_key(&candidate.key) {
                        debug!(signer = %candidate.name, key = %fp.short(), "signature not from this key");
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(VerificationError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::sign_identity;
    use crate::testutil;

    fn issued(user_id: u64, issued_at: u64) -> (Certificate, Signature) {
        let identity = Identity::new(testutil::other().public_key().clone(), user_id, issued_at);
        sign_identity(&identity, testutil::issuer()).unwrap()
    }

    #[test]
    fn verify_with_root_returns_identity() {
        let (cert, sig) = issued(0x2A, 1_700_000_000);
        let identity = Verifier::verify(&cert, &sig, testutil::issuer().public_key()).unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.issued_at, 1_700_000_000);
        assert_eq!(&identity.public_key, testutil::other().public_key());
    }

    #[test]
    fn unrelated_key_is_signature_invalid() {
        let (cert, sig) = issued(0x2A, 1_700_000_000);
        assert_eq!(
            Verifier::verify(&cert, &sig, testutil::other().public_key()),
            Err(VerificationError::SignatureInvalid)
        );
    }

    #[test]
    fn any_flipped_signature_byte_is_rejected() {
        let (cert, sig) = issued(1, 1);
        let root = testutil::issuer().public_key();
        for i in 0..sig.as_bytes().len() {
            let mut bytes = sig.as_bytes().to_vec();
            bytes[i] ^= 0x01;
            assert_eq!(
                Verifier::verify(&cert, &Signature::from_bytes(bytes), root),
                Err(VerificationError::SignatureInvalid),
                "flipped signature byte {i}"
            );
        }
    }

    #[test]
    fn any_flipped_certificate_byte_is_rejected() {
        let (cert, sig) = issued(1, 1);
        let root = testutil::issuer().public_key();
        for i in 0..cert.as_bytes().len() {
            let mut bytes = cert.as_bytes().to_vec();
            bytes[i] ^= 0x01;
            assert_eq!(
                Verifier::verify(&Certificate::from_bytes(bytes), &sig, root),
                Err(VerificationError::SignatureInvalid),
                "flipped certificate byte {i}"
            );
        }
    }

    #[test]
    fn reformatted_certificate_is_rejected() {
        // Same fields, different bytes.
        let (cert, sig) = issued(1, 1);
        let value: serde_json::Value = serde_json::from_slice(cert.as_bytes()).unwrap();
        let compact = Certificate::from_bytes(serde_json::to_vec(&value).unwrap());
        assert_eq!(
            Verifier::verify(&compact, &sig, testutil::issuer().public_key()),
            Err(VerificationError::SignatureInvalid)
        );
    }

    #[test]
    fn signed_garbage_is_malformed() {
        let root = testutil::issuer();
        let cert = Certificate::from_bytes(b"not a certificate".to_vec());
        let sig = Signature::from_bytes(signing::sign(root.private_key(), cert.as_bytes()).unwrap());
        assert!(matches!(
            Verifier::verify(&cert, &sig, root.public_key()),
            Err(VerificationError::CertificateMalformed(_))
        ));
    }

    #[test]
    fn trusted_set_reports_signer() {
        let (cert, sig) = issued(7, 7);
        let mut trusted = TrustedKeys::new();
        trusted.insert("old-root", testutil::other().public_key().clone());
        trusted.insert("root", testutil::issuer().public_key().clone());

        let verified = Verifier::verify_trusted(&cert, &sig, &trusted).unwrap();
        assert_eq!(verified.signer, "root");
        assert_eq!(verified.identity.user_id, 7);
    }

    #[test]
    fn empty_or_wrong_trust_set_rejects() {
        let (cert, sig) = issued(7, 7);
        assert_eq!(
            Verifier::verify_trusted(&cert, &sig, &TrustedKeys::new()),
            Err(VerificationError::SignatureInvalid)
        );
        let wrong = TrustedKeys::root(testutil::other().public_key().clone());
        assert_eq!(
            Verifier::verify_trusted(&cert, &sig, &wrong),
            Err(VerificationError::SignatureInvalid)
        );
    }

    #[test]
    fn insert_replaces_same_name() {
        let mut trusted = TrustedKeys::root(testutil::other().public_key().clone());
        trusted.insert("root", testutil::issuer().public_key().clone());
        assert_eq!(trusted.len(), 1);
        assert_eq!(trusted.get("root"), Some(testutil::issuer().public_key()));
        assert!(trusted.remove("root").is_some());
        assert!(trusted.is_empty());
    }
}
