//! Envelope discovery and decryption (read path)

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use zeroize::{Zeroize, Zeroizing};

use super::names::{EnvelopeNames, META_KEY_SUFFIX};
use super::seal::{meta_material_from_blob, META_KEY_BLOB_LEN};
use super::Metadata;
use crate::crypto::stream::{classify_io_error, decrypt_to_vec};
use crate::crypto::{unwrap_key, DecryptingReader, KeyMaterial, RsaPrivateKey};
use crate::error::{RelayError, RelayResult};

/// Meta document as read back from disk
#[derive(Deserialize)]
struct StoredDocument {
    #[serde(flatten)]
    fields: Map<String, Value>,
    file_key: String,
    file_salt: String,
}

impl Drop for StoredDocument {
    fn drop(&mut self) {
        self.file_key.zeroize();
        self.file_salt.zeroize();
    }
}

/// An envelope whose meta-key and metadata have been decrypted.
#[derive(Debug)]
pub struct OpenedEnvelope {
    names: EnvelopeNames,
    metadata: Metadata,
    file_key: KeyMaterial,
}

impl OpenedEnvelope {
    pub fn names(&self) -> &EnvelopeNames {
        &self.names
    }

    /// Cleartext metadata supplied by the sender
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Key material protecting the data file
    pub fn file_key(&self) -> &KeyMaterial {
        &self.file_key
    }

    /// Streaming plaintext reader over the data file.
    pub fn data_reader(&self) -> RelayResult<DecryptingReader<BufReader<File>>> {
        let file = File::open(&self.names.data)?;
        DecryptingReader::new(BufReader::new(file), &self.file_key)
    }

    /// Decrypt the payload into `out`, returning the number of bytes written.
    pub fn decrypt_to<W: Write>(&self, out: &mut W) -> RelayResult<u64> {
        let mut reader = self.data_reader()?;
        io::copy(&mut reader, out).map_err(classify_io_error)
    }
}

/// Unwrap and decrypt the envelope `ordinal` in `dir` with `secret`.
pub fn open(dir: &Path, ordinal: u64, secret: &RsaPrivateKey) -> RelayResult<OpenedEnvelope> {
    let names = EnvelopeNames::for_ordinal(dir, ordinal);
    if !names.is_committed() {
        return Err(RelayError::MalformedEnvelope(format!(
            "no envelope {} in {}",
            ordinal,
            dir.display()
        )));
    }

    let wrapped = fs::read(&names.meta_key)?;
    let blob = unwrap_key(secret, &wrapped)?;
    if blob.len() != META_KEY_BLOB_LEN {
        return Err(RelayError::MalformedEnvelope(format!(
            "meta key blob is {} bytes, expected {}",
            blob.len(),
            META_KEY_BLOB_LEN
        )));
    }
    let meta_material = meta_material_from_blob(&blob)?;

    let meta_ciphertext = fs::read(&names.meta)?;
    let document_bytes = decrypt_to_vec(&meta_ciphertext, &meta_material)?;
    let document: StoredDocument = serde_json::from_slice(&document_bytes)
        .map_err(|e| RelayError::DecryptionFailed(format!("meta document unreadable: {}", e)))?;

    let key = Zeroizing::new(decode_field(&document.file_key, "file_key")?);
    let salt = Zeroizing::new(decode_field(&document.file_salt, "file_salt")?);
    let file_key = KeyMaterial::new(key.as_slice(), salt.as_slice())?;

    Ok(OpenedEnvelope {
        names,
        metadata: Metadata::from(document.fields.clone()),
        file_key,
    })
}

fn decode_field(encoded: &str, field: &str) -> RelayResult<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| RelayError::MalformedEnvelope(format!("{} is not base64: {}", field, e)))
}

/// Committed envelopes in `dir`, ordered by ordinal.
///
/// Ordinals still being sealed are not reported. A missing directory holds
/// no envelopes.
pub fn list(dir: &Path) -> RelayResult<Vec<EnvelopeNames>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let suffix = format!(".{}", META_KEY_SUFFIX);
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(&suffix) else {
            continue;
        };
        // Only canonical decimal names, so `00` or `+1` never stand in for `0` or `1`
        let Ok(ordinal) = stem.parse::<u64>() else {
            continue;
        };
        if ordinal.to_string() != stem {
            continue;
        }
        let names = EnvelopeNames::for_ordinal(dir, ordinal);
        if names.data.exists() && names.meta.exists() {
            found.push(names);
        }
    }

    found.sort_by_key(|names| names.ordinal);
    Ok(found)
}
