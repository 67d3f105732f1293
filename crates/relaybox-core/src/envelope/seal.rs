//! Envelope sealing (write path)

use std::io::{self, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::names::{EnvelopeNames, Reservation};
use super::{Metadata, FILE_KEY_FIELD, FILE_SALT_FIELD};
use crate::crypto::stream::classify_io_error;
use crate::crypto::{random_bytes, wrap_key, DecryptingReader, EncryptingWriter, KeyMaterial, RsaPublicKey};
use crate::error::RelayResult;

/// Size of the random blob wrapped into the meta-key file
pub const META_KEY_BLOB_LEN: usize = 120;

/// Bytes of the blob used as the meta AES key
pub(crate) const META_KEY_RANGE: Range<usize> = 7..55;

/// Bytes of the blob used as the meta AES salt
pub(crate) const META_SALT_RANGE: Range<usize> = 55..71;

/// Result of a successful seal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// The three published files
    pub names: EnvelopeNames,
    /// Plaintext payload bytes written into the data file
    pub payload_len: u64,
}

/// Meta document as written: caller fields plus the base64 file key.
#[derive(Serialize)]
struct SealedDocument<'a> {
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
    file_key: &'a str,
    file_salt: &'a str,
}

/// Split a meta-key blob into the meta AES key material.
pub(crate) fn meta_material_from_blob(blob: &[u8]) -> RelayResult<KeyMaterial> {
    KeyMaterial::new(&blob[META_KEY_RANGE], &blob[META_SALT_RANGE])
}

/// Seal a payload that arrives encrypted under transport key material.
///
/// The source is decrypted with `transport` and re-encrypted under fresh
/// file key material in a single streaming pass; no plaintext touches disk.
/// On error every file created so far is removed before returning.
pub fn seal<R: Read>(
    dir: &Path,
    source: R,
    transport: &KeyMaterial,
    recipient: &RsaPublicKey,
    metadata: &Metadata,
) -> RelayResult<SealedEnvelope> {
    let reader = DecryptingReader::new(source, transport)?;
    seal_plaintext(dir, reader, recipient, metadata)
}

/// Seal a cleartext payload.
pub fn seal_plaintext<R: Read>(
    dir: &Path,
    mut source: R,
    recipient: &RsaPublicKey,
    metadata: &Metadata,
) -> RelayResult<SealedEnvelope> {
    metadata.check_reserved()?;

    let (reservation, data_file, meta_file) = Reservation::acquire(dir)?;
    let ordinal = reservation.names().ordinal;

    // Meta key: random blob, wrapped for the recipient, staged until commit.
    let blob = random_bytes(META_KEY_BLOB_LEN);
    let meta_material = meta_material_from_blob(&blob)?;
    let wrapped = wrap_key(recipient, &blob)?;
    drop(blob);

    let mut staging = reservation.create_staging()?;
    staging.write_all(&wrapped)?;
    staging.sync_all()?;
    drop(staging);

    // Meta document carries the data key, so it is only readable after unwrap.
    let file_material = KeyMaterial::generate();
    let document = encode_document(metadata, &file_material)?;

    let mut meta_writer = EncryptingWriter::new(meta_file, &meta_material)?;
    meta_writer.write_all(&document)?;
    let meta_file = meta_writer.finish()?;
    meta_file.sync_all()?;
    drop(document);
    drop(meta_material);

    // Data: decrypt-from-source → encrypt-to-file in one pass. The encryptor
    // must emit its final block before the file is synced.
    let mut data_writer = EncryptingWriter::new(BufWriter::new(data_file), &file_material)?;
    let payload_len = io::copy(&mut source, &mut data_writer).map_err(classify_io_error)?;
    let data_file = data_writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())?;
    data_file.sync_all()?;
    drop(file_material);

    debug!(ordinal, payload_len, "Envelope files written");

    let names = reservation.commit()?;
    info!(
        dir = %dir.display(),
        ordinal = names.ordinal,
        payload_len,
        "Sealed envelope"
    );

    Ok(SealedEnvelope { names, payload_len })
}

fn encode_document(metadata: &Metadata, file_material: &KeyMaterial) -> RelayResult<Zeroizing<Vec<u8>>> {
    let file_key = Zeroizing::new(BASE64.encode(file_material.key()));
    let file_salt = Zeroizing::new(BASE64.encode(file_material.salt()));

    let document = SealedDocument {
        fields: metadata.fields(),
        file_key: &file_key,
        file_salt: &file_salt,
    };
    debug_assert!(!metadata.fields().contains_key(FILE_KEY_FIELD));
    debug_assert!(!metadata.fields().contains_key(FILE_SALT_FIELD));

    Ok(Zeroizing::new(serde_json::to_vec(&document)?))
}
