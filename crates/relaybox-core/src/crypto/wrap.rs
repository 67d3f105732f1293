//! RSA key wrapping for meta keys
//!
//! The meta-key file of an envelope is the recipient's RSA public key
//! applied to a 120-byte random blob with PKCS#1 v1.5 padding. The padding
//! scheme is part of the envelope format.
//!
//! Keys are exchanged as PEM: SPKI for public keys, PKCS#8 for private keys.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::Pkcs1v15Encrypt;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{RelayError, RelayResult};

pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Smallest modulus that can carry a 120-byte blob under PKCS#1 v1.5
/// (blob plus 11 bytes of padding overhead).
pub const MIN_RSA_BITS: usize = 1048;

/// Generate a new RSA private key with a modulus of `bits` bits.
pub fn generate_keypair(bits: usize) -> RelayResult<RsaPrivateKey> {
    if bits < MIN_RSA_BITS {
        return Err(RelayError::Config(format!(
            "RSA modulus of {} bits is too small, need at least {}",
            bits, MIN_RSA_BITS
        )));
    }
    Ok(RsaPrivateKey::new(&mut OsRng, bits)?)
}

/// Encrypt `blob` to `recipient` with PKCS#1 v1.5 padding.
pub fn wrap_key(recipient: &RsaPublicKey, blob: &[u8]) -> RelayResult<Vec<u8>> {
    Ok(recipient.encrypt(&mut OsRng, Pkcs1v15Encrypt, blob)?)
}

/// Recover a blob wrapped with [`wrap_key`].
pub fn unwrap_key(secret: &RsaPrivateKey, wrapped: &[u8]) -> RelayResult<Zeroizing<Vec<u8>>> {
    secret
        .decrypt(Pkcs1v15Encrypt, wrapped)
        .map(Zeroizing::new)
        .map_err(|e| RelayError::DecryptionFailed(format!("Meta key unwrap failed: {}", e)))
}

/// Encode a public key as SPKI PEM.
pub fn public_key_to_pem(key: &RsaPublicKey) -> RelayResult<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| RelayError::KeyEncoding(e.to_string()))
}

/// Decode an SPKI PEM public key.
pub fn public_key_from_pem(pem: &str) -> RelayResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| RelayError::KeyEncoding(e.to_string()))
}

/// Encode a private key as PKCS#8 PEM.
pub fn private_key_to_pem(key: &RsaPrivateKey) -> RelayResult<Zeroizing<String>> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| RelayError::KeyEncoding(e.to_string()))
}

/// Decode a PKCS#8 PEM private key.
pub fn private_key_from_pem(pem: &str) -> RelayResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| RelayError::KeyEncoding(e.to_string()))
}

/// Short hex fingerprint (first 8 bytes of SHA-256 over the SPKI DER).
pub fn fingerprint(key: &RsaPublicKey) -> RelayResult<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| RelayError::KeyEncoding(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(hex::encode(&digest[..8]))
}
