//! # umbrella-core
//!
//! Peer identity layer for Umbrella nodes:
//! - RSA-2048 node keypairs persisted as PKCS#1 PEM ([`keystore`])
//! - Certificates binding a public key to a numeric user id ([`certificate`])
//! - Issuance by a trust root ([`authority`]) and detached RSA-SHA512
//!   signature verification ([`verifier`])
//! - Read-only accessors for publishing a node's own identity ([`service`])
//!
//! This crate has no network code. The HTTP transport lives in
//! `umbrella-node` and only calls into the types exported here.

pub mod authority;
pub mod certificate;
pub mod datastore;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod identity;
pub mod keystore;
pub mod service;
pub mod signing;
pub mod storage;
pub mod verifier;

pub use authority::CertificateAuthority;
pub use certificate::{Certificate, Identity, Signature};
pub use datastore::DataStore;
pub use error::{Error, Result, VerificationError};
pub use hash::Fingerprint;
pub use identity::KeyPair;
pub use keystore::KeyStore;
pub use service::{IdentityService, WhoAmI};
pub use storage::CertificateStore;
pub use verifier::{TrustedKey, TrustedKeys, Verified, Verifier};

/// Re-exported so callers can name key types without depending on `rsa`.
pub use rsa::{RsaPrivateKey, RsaPublicKey};

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared RSA keys for tests. Key generation is slow in debug builds,
    //! so tests that just need "some issuer" share these.

    use std::sync::OnceLock;

    use crate::identity::KeyPair;

    /// Modulus size for test keys. Large enough for a SHA-512 DigestInfo.
    pub const TEST_KEY_BITS: usize = 1024;

    pub fn issuer() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| KeyPair::generate_with_bits(TEST_KEY_BITS).unwrap())
    }

    pub fn other() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| KeyPair::generate_with_bits(TEST_KEY_BITS).unwrap())
    }
}
