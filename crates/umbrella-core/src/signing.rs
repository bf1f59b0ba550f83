//! RSA signing and verification.
//!
//! Certificates are signed with RSASSA-PKCS1-v1_5 over a SHA-512 digest
//! of the exact certificate bytes:
//!
//! 1. digest = SHA-512(message)
//! 2. signature = RSA-PKCS1-v1_5-SIGN(private_key, DigestInfo(SHA-512, digest))
//!
//! Verification recomputes the digest from the received bytes and checks
//! it against the signature under the trusted public key.

use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};

use crate::error::{Error, Result, VerificationError};

fn scheme() -> Pkcs1v15Sign {
    Pkcs1v15Sign::new::<Sha512>()
}

/// Sign a message with an RSA private key.
/// Returns the raw signature (modulus-sized).
pub fn sign(private_key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha512::digest(message);
    private_key
        .sign(scheme(), &digest)
        .map_err(|e| Error::SigningFailed(e.to_string()))
}

/// Verify an RSA-SHA512 signature.
pub fn verify(
    public_key: &RsaPublicKey,
    message: &[u8],
    signature: &[u8],
) -> std::result::Result<(), VerificationError> {
    let digest = Sha512::digest(message);
    public_key
        .verify(scheme(), &digest, signature)
        .map_err(|_| VerificationError::SignatureInvalid)
}
