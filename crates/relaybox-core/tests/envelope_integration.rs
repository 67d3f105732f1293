//! Envelope codec integration tests
//!
//! Seal → list → open round trips through the public API, including the
//! block-boundary payload sizes and concurrent sealers sharing a directory.

use std::collections::HashSet;
use std::fs;
use std::sync::OnceLock;
use std::thread;

use relaybox_core::crypto::{encrypt_to_vec, generate_keypair};
use relaybox_core::envelope::{list, open, seal, seal_plaintext, META_KEY_BLOB_LEN};
use relaybox_core::{KeyMaterial, Metadata, RelayError, RsaPrivateKey, RsaPublicKey};
use tempfile::tempdir;

fn recipient() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(2048).unwrap())
}

fn stranger() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(2048).unwrap())
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_roundtrip_across_block_boundaries() {
    let dir = tempdir().unwrap();
    let secret = recipient();
    let public = RsaPublicKey::from(secret);

    for len in [0usize, 1, 15, 16, 17, 8191, 8192, 8193, 100_000] {
        let transport = KeyMaterial::generate();
        let plaintext = payload(len);
        let uploaded = encrypt_to_vec(&plaintext, &transport).unwrap();

        let metadata = Metadata::new().with("size", len as u64);
        let sealed = seal(dir.path(), &uploaded[..], &transport, &public, &metadata).unwrap();
        assert_eq!(sealed.payload_len, len as u64);

        let opened = open(dir.path(), sealed.names.ordinal, secret).unwrap();
        assert_eq!(opened.metadata(), &metadata);

        let mut out = Vec::new();
        assert_eq!(opened.decrypt_to(&mut out).unwrap(), len as u64);
        assert_eq!(out, plaintext, "payload of {} bytes", len);
    }

    assert_eq!(list(dir.path()).unwrap().len(), 9);
}

#[test]
fn test_all_three_files_present() {
    let dir = tempdir().unwrap();
    let public = RsaPublicKey::from(recipient());

    let sealed = seal_plaintext(dir.path(), &b"x"[..], &public, &Metadata::new()).unwrap();
    for path in sealed.names.paths() {
        assert!(path.exists(), "{} missing", path.display());
    }

    // Wrapped blob is exactly one RSA block
    let wrapped = fs::read(&sealed.names.meta_key).unwrap();
    assert_eq!(wrapped.len(), 256);
    assert!(META_KEY_BLOB_LEN < wrapped.len());

    // Nothing else left behind (no staging file)
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[test]
fn test_data_file_is_not_plaintext() {
    let dir = tempdir().unwrap();
    let public = RsaPublicKey::from(recipient());
    let secret_text = b"the launch code is 0000".repeat(10);

    let sealed = seal_plaintext(dir.path(), &secret_text[..], &public, &Metadata::new()).unwrap();
    let on_disk = fs::read(&sealed.names.data).unwrap();
    assert!(!on_disk.windows(11).any(|w| w == b"launch code"));
    let meta_on_disk = fs::read(&sealed.names.meta).unwrap();
    assert!(!meta_on_disk.windows(8).any(|w| w == b"file_key"));
}

// ============================================================================
// Failure Cases
// ============================================================================

#[test]
fn test_only_recipient_can_open() {
    let dir = tempdir().unwrap();
    let public = RsaPublicKey::from(recipient());

    let sealed = seal_plaintext(dir.path(), &b"for your eyes"[..], &public, &Metadata::new()).unwrap();
    let result = open(dir.path(), sealed.names.ordinal, stranger());
    assert!(matches!(result, Err(RelayError::DecryptionFailed(_))));
}

#[test]
fn test_truncated_upload_leaves_nothing() {
    let dir = tempdir().unwrap();
    let public = RsaPublicKey::from(recipient());

    // Upload cut off mid-block
    let transport = KeyMaterial::generate();
    let uploaded = encrypt_to_vec(&payload(5000), &transport).unwrap();
    let truncated = &uploaded[..uploaded.len() - 5];
    let result = seal(dir.path(), truncated, &transport, &public, &Metadata::new());

    assert!(matches!(result, Err(RelayError::DecryptionFailed(_))));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_target_dir_leaves_nothing() {
    let dir = tempdir().unwrap();
    let public = RsaPublicKey::from(recipient());
    let target = dir.path().join("no-such-inbox");

    let result = seal_plaintext(&target, &b"x"[..], &public, &Metadata::new());
    assert!(matches!(result, Err(RelayError::Io(_))));
    assert!(!target.exists());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_sealers_get_distinct_ordinals() {
    let dir = tempdir().unwrap();
    let public = RsaPublicKey::from(recipient());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let dir = dir.path().to_path_buf();
            let public = public.clone();
            thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        let body = format!("thread {} item {}", t, i);
                        let meta = Metadata::new().with("body", body.as_str());
                        seal_plaintext(&dir, body.as_bytes(), &public, &meta)
                            .unwrap()
                            .names
                            .ordinal
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ordinals: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let unique: HashSet<_> = ordinals.iter().copied().collect();
    assert_eq!(unique.len(), 20);

    for names in list(dir.path()).unwrap() {
        let opened = open(dir.path(), names.ordinal, recipient()).unwrap();
        let mut out = Vec::new();
        opened.decrypt_to(&mut out).unwrap();
        assert_eq!(
            opened.metadata().get_str("body").unwrap().as_bytes(),
            &out[..]
        );
    }
}
