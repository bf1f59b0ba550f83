//! Node keypairs.
//!
//! Handles RSA keypair generation and the PKCS#1 PEM representation used
//! on disk and on the wire. The private half never leaves the node that
//! generated it.

use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::encoding;
use crate::error::{Error, Result};
use crate::hash::Fingerprint;

/// Modulus size for node keys.
pub const RSA_KEY_BITS: usize = 2048;

/// A node identity keypair (RSA).
///
/// The private key stays on the node.
/// The public key is published and bound into certificates.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a new 2048-bit keypair using the OS cryptographic RNG.
    ///
    /// This is CPU-bound and can take a noticeable fraction of a second.
    pub fn generate() -> Result<Self> {
        Self::generate_with_bits(RSA_KEY_BITS)
    }

    /// Generate a keypair with a custom modulus size.
    pub fn generate_with_bits(bits: usize) -> Result<Self> {
        let private =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self::from_private_key(private))
    }

    /// Wrap an existing private key.
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// Get the private key. Handle with care.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Get the public key. Safe to share.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Public key as PKCS#1 PEM text.
    pub fn public_key_pem(&self) -> Result<String> {
        encoding::public_key_to_pem(&self.public)
    }

    /// Fingerprint of the public key.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Fingerprint::of_public_key(&self.public)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.fingerprint() {
            Ok(fp) => write!(f, "KeyPair({})", fp.short()),
            Err(_) => f.write_str("KeyPair(<unencodable>)"),
        }
    }
}
