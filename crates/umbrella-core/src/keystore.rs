//! On-disk key material for the local node and the trust anchor.
//!
//! Layout:
//! - `<data>/keys/key.pub`: node public key, PKCS#1 PEM
//! - `<data>/keys/key`: node private key, PKCS#1 PEM, owner-only
//! - `<root>/root_key.pub`: trust anchor public key, read-only
//!
//! The public key file is the "initialized" marker. It is always written
//! after the private key, so its presence means a complete pair was stored.
//! Mutations of the pair hold an exclusive [`FileLock`] on `keys/.lock`,
//! and reads of it hold a shared one, so neither another thread nor another
//! process can observe a torn pair. The lock belongs to the open file, so a
//! holder that dies releases it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rsa::RsaPublicKey;
use serde_json::Value;
use tracing::{debug, info};

use crate::datastore::DataStore;
use crate::encoding::{private_key_from_pem, private_key_to_pem, public_key_from_pem};
use crate::error::{Error, Result};
use crate::identity::{KeyPair, RSA_KEY_BITS};
use crate::storage::{FileLock, LOCK_TIMEOUT, remove_if_exists, write_atomic, write_atomic_private};

pub const KEYS_DIR: &str = "keys";
pub const PUBLIC_KEY_FILE: &str = "key.pub";
pub const PRIVATE_KEY_FILE: &str = "key";
pub const ROOT_KEY_FILE: &str = "root_key.pub";
pub const LOCK_FILE: &str = ".lock";

/// Owner of the node's key files.
#[derive(Debug)]
pub struct KeyStore {
    data_dir: PathBuf,
    root_dir: PathBuf,
    key_bits: usize,
    lock_timeout: Duration,
}

impl KeyStore {
    /// Key store rooted at `data_dir`, trusting the root key found in `root_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            root_dir: root_dir.into(),
            key_bits: RSA_KEY_BITS,
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    /// Override the modulus size for newly generated keys.
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// How long to wait for another holder of the key lock. The default
    /// covers one RSA generation.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join(KEYS_DIR)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.keys_dir().join(PUBLIC_KEY_FILE)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.keys_dir().join(PRIVATE_KEY_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.keys_dir().join(LOCK_FILE)
    }

    pub fn root_key_path(&self) -> PathBuf {
        self.root_dir.join(ROOT_KEY_FILE)
    }

    /// Make sure a keypair exists, generating one on first use.
    ///
    /// Never touches an existing pair. Returns `true` if a new pair was
    /// generated. Generation is CPU-bound; async callers should run this on
    /// a blocking thread.
    pub fn ensure_initialized(&self) -> Result<bool> {
        let _lock = self.lock_exclusive()?;

        if self.public_key_path().exists() {
            debug!("keypair already present at {}", self.keys_dir().display());
            return Ok(false);
        }

        let keypair = self.generate_and_store()?;
        info!(fingerprint = %keypair.fingerprint()?.short(), "generated node keypair");
        Ok(true)
    }

    /// Load both halves of the node keypair.
    pub fn load_keypair(&self) -> Result<KeyPair> {
        let _lock = self.lock_shared()?;

        let private_path = self.private_key_path();
        let public_path = self.public_key_path();
        let private_pem = read_key_file(&private_path)?;
        let public_pem = read_key_file(&public_path)?;

        let private = private_key_from_pem(&private_pem).map_err(|e| corrupt(&private_path, e))?;
        let public = public_key_from_pem(&public_pem).map_err(|e| corrupt(&public_path, e))?;

        let keypair = KeyPair::from_private_key(private);
        if keypair.public_key() != &public {
            return Err(Error::KeyMaterialCorrupt {
                path: public_path,
                reason: "public key does not match private key".into(),
            });
        }
        Ok(keypair)
    }

    /// The node's public key, read from the public half only.
    ///
    /// Waits out a reset in progress instead of seeing the pair missing.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let _lock = self.lock_shared()?;
        let path = self.public_key_path();
        let pem = read_key_file(&path)?;
        public_key_from_pem(&pem).map_err(|e| corrupt(&path, e))
    }

    /// The node's public key file contents (PKCS#1 PEM text).
    pub fn public_key_pem(&self) -> Result<String> {
        let _lock = self.lock_shared()?;
        read_key_file(&self.public_key_path())
    }

    /// Discard the current keypair and generate an unrelated one.
    ///
    /// Certificates issued for the old key will no longer verify against
    /// the new one.
    pub fn reset_keypair(&self) -> Result<KeyPair> {
        let _lock = self.lock_exclusive()?;

        // Public first, so a crash mid-reset leaves "uninitialized".
        remove_if_exists(&self.public_key_path())?;
        remove_if_exists(&self.private_key_path())?;

        let keypair = self.generate_and_store()?;
        info!(fingerprint = %keypair.fingerprint()?.short(), "rotated node keypair");
        Ok(keypair)
    }

    /// Load the trust anchor.
    ///
    /// A missing root key is [`Error::TrustAnchorMissing`]; nothing that
    /// depends on verification can proceed without it.
    pub fn load_root_key(&self) -> Result<RsaPublicKey> {
        let path = self.root_key_path();
        let pem = match fs::read_to_string(&path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::TrustAnchorMissing(path));
            }
            Err(e) => return Err(e.into()),
        };
        public_key_from_pem(&pem).map_err(|e| corrupt(&path, e))
    }

    /// The application data blob living next to the keys.
    pub fn data_store(&self) -> DataStore {
        DataStore::new(&self.data_dir)
    }

    pub fn load_or_init_data_blob(&self) -> Result<Value> {
        self.data_store().load_or_init()
    }

    pub fn store_data_blob(&self, value: &Value) -> Result<()> {
        self.data_store().store(value)
    }

    fn generate_and_store(&self) -> Result<KeyPair> {
        let started = Instant::now();
        let keypair = KeyPair::generate_with_bits(self.key_bits)?;
        debug!(bits = self.key_bits, elapsed = ?started.elapsed(), "RSA key generation finished");

        let private_pem = private_key_to_pem(keypair.private_key())?;
        let public_pem = keypair.public_key_pem()?;
        write_atomic_private(&self.private_key_path(), private_pem.as_bytes())?;
        write_atomic(&self.public_key_path(), public_pem.as_bytes())?;
        Ok(keypair)
    }

    fn lock_exclusive(&self) -> Result<FileLock> {
        FileLock::exclusive(&self.lock_path(), self.lock_timeout)
    }

    fn lock_shared(&self) -> Result<Option<FileLock>> {
        FileLock::shared(&self.lock_path(), self.lock_timeout)
    }
}

fn read_key_file(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(pem) => Ok(pem),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(Error::KeyMaterialMissing(path.to_path_buf()))
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(corrupt(path, e)),
        Err(e) => Err(e.into()),
    }
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::KeyMaterialCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
