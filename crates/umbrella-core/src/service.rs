//! Read-only view of the node's own identity, for the transport layer.
//!
//! Nothing here computes or checks signatures. The service only reads
//! what [`KeyStore`] and the certificate authority have already written.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rsa::RsaPublicKey;
use serde::Serialize;

use crate::certificate::{Certificate, Signature};
use crate::encoding::{parse_user_id, user_id_hex};
use crate::error::Result;
use crate::hash::Fingerprint;
use crate::keystore::KeyStore;
use crate::storage::{CertificateStore, write_atomic};

/// File holding the node's own user id as a hex line.
pub const NODE_ID_FILE: &str = "id";

/// Answer to "who am I".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhoAmI {
    pub user_id: u64,
    /// `user_id` as it appears in certificate file names.
    pub user_id_hex: String,
    /// BLAKE3 fingerprint of the node public key.
    pub fingerprint: String,
    pub has_certificate: bool,
}

/// Accessors for the node's published identity.
#[derive(Debug, Clone)]
pub struct IdentityService {
    keys: Arc<KeyStore>,
    certificates: CertificateStore,
}

impl IdentityService {
    pub fn new(keys: Arc<KeyStore>, certificates: CertificateStore) -> Self {
        Self { keys, certificates }
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    pub fn certificates(&self) -> &CertificateStore {
        &self.certificates
    }

    pub fn own_public_key(&self) -> Result<RsaPublicKey> {
        self.keys.public_key()
    }

    /// The public key exactly as stored (PKCS#1 PEM).
    pub fn own_public_key_pem(&self) -> Result<String> {
        self.keys.public_key_pem()
    }

    /// [`Error::NotFound`](crate::Error::NotFound) until a certificate has
    /// been issued for `self_id`.
    pub fn own_certificate(&self, self_id: u64) -> Result<Certificate> {
        self.certificates.load_certificate(self_id)
    }

    pub fn own_signature(&self, self_id: u64) -> Result<Signature> {
        self.certificates.load_signature(self_id)
    }

    /// Certificate and signature read as one pair, for checking them
    /// against each other.
    pub fn own_credentials(&self, self_id: u64) -> Result<(Certificate, Signature)> {
        self.certificates.load_pair(self_id)
    }

    pub fn whoami(&self, self_id: u64) -> Result<WhoAmI> {
        let fingerprint = Fingerprint::of_public_key(&self.own_public_key()?)?;
        Ok(WhoAmI {
            user_id: self_id,
            user_id_hex: user_id_hex(self_id),
            fingerprint: fingerprint.to_hex(),
            has_certificate: self.certificates.contains(self_id),
        })
    }

    fn node_id_path(&self) -> PathBuf {
        self.keys.data_dir().join(NODE_ID_FILE)
    }

    /// The node id recorded in `<data>/id`, if any.
    pub fn load_node_id(&self) -> Result<Option<u64>> {
        match fs::read_to_string(self.node_id_path()) {
            Ok(text) => {
                let line = text.lines().next().unwrap_or_default();
                parse_user_id(line).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the node id in `<data>/id`.
    pub fn store_node_id(&self, user_id: u64) -> Result<()> {
        fs::create_dir_all(self.keys.data_dir())?;
        write_atomic(&self.node_id_path(), user_id_hex(user_id).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::CertificateAuthority;
    use crate::error::Error;
    use crate::testutil::{self, TEST_KEY_BITS};
    use crate::verifier::Verifier;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> IdentityService {
        let keys = KeyStore::new(dir.path(), dir.path().join("root")).with_key_bits(TEST_KEY_BITS);
        keys.ensure_initialized().unwrap();
        IdentityService::new(Arc::new(keys), CertificateStore::new(dir.path()))
    }

    #[test]
    fn public_key_matches_keystore() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let kp = svc.key_store().load_keypair().unwrap();
        assert_eq!(&svc.own_public_key().unwrap(), kp.public_key());
        assert_eq!(svc.own_public_key_pem().unwrap(), kp.public_key_pem().unwrap());
    }

    #[test]
    fn certificate_before_issue_is_not_found() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(matches!(
            svc.own_certificate(0x2A),
            Err(Error::NotFound { what: "certificate", .. })
        ));
        assert!(matches!(
            svc.own_signature(0x2A),
            Err(Error::NotFound { what: "signature", .. })
        ));
        assert!(svc.own_credentials(0x2A).unwrap_err().is_not_found());
        assert!(!svc.whoami(0x2A).unwrap().has_certificate);
    }

    #[test]
    fn published_identity_verifies_under_root() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let root = testutil::issuer();
        let own = svc.own_public_key().unwrap();

        CertificateAuthority::new(svc.certificates().clone())
            .issue(&own, 0x2A, root)
            .unwrap();

        let cert = svc.own_certificate(0x2A).unwrap();
        let sig = svc.own_signature(0x2A).unwrap();
        let identity = Verifier::verify(&cert, &sig, root.public_key()).unwrap();
        assert_eq!(identity.public_key, own);
        assert_eq!(svc.own_credentials(0x2A).unwrap(), (cert, sig));

        let me = svc.whoami(0x2A).unwrap();
        assert!(me.has_certificate);
        assert_eq!(me.user_id_hex, "2a");
        assert_eq!(me.fingerprint.len(), 64);
    }

    #[test]
    fn node_id_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert_eq!(svc.load_node_id().unwrap(), None);
        svc.store_node_id(0xBEEF).unwrap();
        assert_eq!(svc.load_node_id().unwrap(), Some(0xBEEF));
        assert_eq!(fs::read_to_string(dir.path().join(NODE_ID_FILE)).unwrap(), "beef");
    }

    #[test]
    fn node_id_file_with_garbage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        fs::write(dir.path().join(NODE_ID_FILE), "hello\n").unwrap();
        assert!(matches!(svc.load_node_id(), Err(Error::InvalidUserId(_))));
    }
}
