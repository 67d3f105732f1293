//! Key material and cipher construction for envelopes
//!
//! Two kinds of symmetric key material flow through the relay:
//!
//! - **Transport key material** protects an uploaded file while it sits in
//!   the spool. Only the component that accepted the upload knows it.
//! - **File key material** is generated fresh for every envelope and
//!   protects its data file.
//!
//! Both are a `(key, salt)` pair of arbitrary length. The actual AES-256-CBC
//! key and IV are derived from the pair with HKDF-SHA256, so a 48-byte key
//! and 16-byte salt (the sizes generated here) map onto a 32-byte AES key
//! and a 16-byte IV.
//!
//! Asymmetric wrapping of the meta key lives in [`wrap`], the streaming
//! AES transcoders in [`stream`].

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{RelayError, RelayResult};

pub mod stream;
pub mod wrap;

pub use stream::{decrypt_to_vec, encrypt_to_vec, DecryptingReader, EncryptingWriter, AES_BLOCK_SIZE};
pub use wrap::{
    fingerprint, generate_keypair, private_key_from_pem, private_key_to_pem, public_key_from_pem,
    public_key_to_pem, unwrap_key, wrap_key, RsaPrivateKey, RsaPublicKey, MIN_RSA_BITS,
};

/// Length of generated file keys in bytes
pub const FILE_KEY_LEN: usize = 48;

/// Length of generated file salts in bytes
pub const FILE_SALT_LEN: usize = 16;

/// Domain separation string for the AES key schedule
const HKDF_INFO: &[u8] = b"relaybox-aes256-cbc-v1";

/// A symmetric key/salt pair, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: Vec<u8>,
    salt: Vec<u8>,
}

impl KeyMaterial {
    /// Wrap an existing key and salt.
    ///
    /// Neither may be empty.
    pub fn new(key: impl Into<Vec<u8>>, salt: impl Into<Vec<u8>>) -> RelayResult<Self> {
        let material = Self {
            key: key.into(),
            salt: salt.into(),
        };
        if material.key.is_empty() || material.salt.is_empty() {
            return Err(RelayError::Crypto(
                "Key material requires a non-empty key and salt".to_string(),
            ));
        }
        Ok(material)
    }

    /// Generate fresh 48-byte key / 16-byte salt material.
    pub fn generate() -> Self {
        let mut key = vec![0u8; FILE_KEY_LEN];
        let mut salt = vec![0u8; FILE_SALT_LEN];
        rand::rng().fill_bytes(&mut key);
        rand::rng().fill_bytes(&mut salt);
        Self { key, salt }
    }

    /// Raw key bytes
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Raw salt bytes
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Derive the AES-256 key and CBC IV for this material.
    pub(crate) fn cipher_keys(&self) -> RelayResult<CipherKeys> {
        let hkdf = Hkdf::<Sha256>::new(Some(&self.salt), &self.key);
        let mut okm = Zeroizing::new([0u8; 48]);
        hkdf.expand(HKDF_INFO, &mut okm[..])
            .map_err(|e| RelayError::Crypto(format!("Key derivation failed: {}", e)))?;

        let mut keys = CipherKeys {
            key: Zeroizing::new([0u8; 32]),
            iv: Zeroizing::new([0u8; 16]),
        };
        keys.key.copy_from_slice(&okm[..32]);
        keys.iv.copy_from_slice(&okm[32..]);
        Ok(keys)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &format_args!("<{} bytes redacted>", self.key.len()))
            .field("salt", &format_args!("<{} bytes redacted>", self.salt.len()))
            .finish()
    }
}

/// AES-256 key and IV derived from a [`KeyMaterial`]
pub(crate) struct CipherKeys {
    pub(crate) key: Zeroizing<[u8; 32]>,
    pub(crate) iv: Zeroizing<[u8; 16]>,
}

/// Fill a zeroizing buffer with `len` cryptographically random bytes.
pub fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    rand::rng().fill_bytes(bytes.as_mut_slice());
    bytes
}
