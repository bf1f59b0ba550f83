//! Certificate issuance.
//!
//! Issuing a certificate:
//!
//! 1. Build the [`Identity`] (subject key, user id, issuance time)
//! 2. Encode it to canonical certificate bytes
//! 3. Sign those bytes with the issuer's private key (RSA-SHA512)
//! 4. Check the signature against the issuer's public key
//! 5. Store certificate and signature under the user id
//!
//! The authority never owns keys. It borrows the issuer keypair for the
//! duration of one call.

use rsa::RsaPublicKey;
use tracing::{error, info};

use crate::certificate::{Certificate, Identity, Signature, unix_now};
use crate::encoding::{public_key_from_pem, user_id_hex};
use crate::error::{Error, Result};
use crate::identity::KeyPair;
use crate::signing;
use crate::storage::CertificateStore;

/// Signs identities and publishes the results to a [`CertificateStore`].
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    store: CertificateStore,
}

impl CertificateAuthority {
    pub fn new(store: CertificateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// Issue a certificate for `subject` stamped with the current time.
    pub fn issue(
        &self,
        subject: &RsaPublicKey,
        user_id: u64,
        issuer: &KeyPair,
    ) -> Result<(Certificate, Signature)> {
        self.issue_at(subject, user_id, unix_now(), issuer)
    }

    /// Issue a certificate with an explicit issuance time.
    pub fn issue_at(
        &self,
        subject: &RsaPublicKey,
        user_id: u64,
        issued_at: u64,
        issuer: &KeyPair,
    ) -> Result<(Certificate, Signature)> {
        let identity = Identity::new(subject.clone(), user_id, issued_at);
        let (certificate, signature) = sign_identity(&identity, issuer)?;
        self.store.save(user_id, &certificate, &signature)?;

        info!(
            user_id = %user_id_hex(user_id),
            subject = %identity.fingerprint()?.short(),
            issuer = %issuer.fingerprint()?.short(),
            "issued certificate"
        );
        Ok((certificate, signature))
    }

    /// Issue for a subject key given as PKCS#1 PEM text, the form peers
    /// publish.
    pub fn issue_from_pem(
        &self,
        subject_pem: &str,
        user_id: u64,
        issuer: &KeyPair,
    ) -> Result<(Certificate, Signature)> {
        let subject = public_key_from_pem(subject_pem)?;
        self.issue(&subject, user_id, issuer)
    }
}

/// Encode and sign an identity without storing it.
///
/// The signature is checked against the issuer's public key before it is
/// returned; a mismatch is [`Error::SelfVerificationFailed`].
pub fn sign_identity(identity: &Identity, issuer: &KeyPair) -> Result<(Certificate, Signature)> {
    let certificate = identity.to_certificate()?;
    let signature = signing::sign(issuer.private_key(), certificate.as_bytes())?;

    if signing::verify(issuer.public_key(), certificate.as_bytes(), &signature).is_err() {
        error!(user_id = %user_id_hex(identity.user_id), "issued signature does not verify");
        return Err(Error::SelfVerificationFailed);
    }

    Ok((certificate, Signature::from_bytes(signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use tempfile::TempDir;

    fn authority(dir: &TempDir) -> CertificateAuthority {
        CertificateAuthority::new(CertificateStore::new(dir.path()))
    }

    #[test]
    fn issue_persists_pair() {
        let dir = TempDir::new().unwrap();
        let ca = authority(&dir);
        let subject = testutil::other().public_key();

        let (cert, sig) = ca.issue_at(subject, 0x2A, 1_700_000_000, testutil::issuer()).unwrap();

        assert_eq!(ca.store().load_certificate(0x2A).unwrap(), cert);
        assert_eq!(ca.store().load_signature(0x2A).unwrap(), sig);
        assert!(dir.path().join("2a.json").is_file());
        assert!(dir.path().join("2a.pem").is_file());
    }

    #[test]
    fn issued_signature_verifies_under_issuer() {
        let dir = TempDir::new().unwrap();
        let ca = authority(&dir);
        let issuer = testutil::issuer();

        let (cert, sig) = ca.issue(testutil::other().public_key(), 9, issuer).unwrap();
        assert!(signing::verify(issuer.public_key(), cert.as_bytes(), sig.as_bytes()).is_ok());
    }

    #[test]
    fn issue_records_current_time() {
        let dir = TempDir::new().unwrap();
        let ca = authority(&dir);
        let before = unix_now();
        let (cert, _) = ca.issue(testutil::other().public_key(), 1, testutil::issuer()).unwrap();
        let identity = Identity::from_certificate(&cert).unwrap();
        assert!(identity.issued_at >= before);
        assert!(identity.issued_at <= unix_now());
    }

    #[test]
    fn reissue_overwrites() {
        let dir = TempDir::new().unwrap();
        let ca = authority(&dir);
        let issuer = testutil::issuer();
        ca.issue_at(testutil::other().public_key(), 5, 100, issuer).unwrap();
        let (second, _) = ca.issue_at(issuer.public_key(), 5, 200, issuer).unwrap();

        let stored = ca.store().load_certificate(5).unwrap();
        assert_eq!(stored, second);
        assert_eq!(Identity::from_certificate(&stored).unwrap().issued_at, 200);
    }

    #[test]
    fn issue_from_pem_accepts_published_key() {
        let dir = TempDir::new().unwrap();
        let ca = authority(&dir);
        let pem = testutil::other().public_key_pem().unwrap();
        let (cert, _) = ca.issue_from_pem(&pem, 3, testutil::issuer()).unwrap();
        let identity = Identity::from_certificate(&cert).unwrap();
        assert_eq!(&identity.public_key, testutil::other().public_key());
    }

    #[test]
    fn malformed_subject_is_invalid_key() {
        let dir = TempDir::new().unwrap();
        let ca = authority(&dir);
        let result = ca.issue_from_pem("-----BEGIN RSA PUBLIC KEY-----\nAAAA\n", 3, testutil::issuer());
        assert!(matches!(result, Err(Error::InvalidKey(_))));
        assert!(!ca.store().contains(3));
    }
}
