//! Three-file encrypted envelopes
//!
//! An envelope is one delivered item in a target directory, stored as three
//! files sharing an ordinal:
//!
//! ```text
//! <n>.metakey   RSA(recipient_pk, blob[120])          - PKCS#1 v1.5
//!                 blob[7..55]  = meta AES key
//!                 blob[55..71] = meta AES salt
//! <n>.meta      AES(meta key, JSON{ ...metadata, file_key, file_salt })
//! <n>.data      AES(file key, payload)
//! ```
//!
//! Only the holder of the recipient's private key can walk the chain
//! meta-key → meta → data. Because the data key lives inside the metadata
//! document, the same payload can be re-sealed for a second recipient
//! without touching the first envelope.
//!
//! ## Atomicity
//!
//! Names are reserved with create-if-not-exists, so concurrent sealers in
//! the same directory never collide. The meta-key file is written to a
//! hidden staging name and renamed into place last; an ordinal without a
//! `<n>.metakey` file is not an envelope, and [`list`] never reports it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, RelayResult};

mod names;
mod open;
mod seal;

pub use names::{EnvelopeNames, DATA_SUFFIX, META_KEY_SUFFIX, META_SUFFIX};
pub use open::{list, open, OpenedEnvelope};
pub use seal::{seal, seal_plaintext, SealedEnvelope, META_KEY_BLOB_LEN};

/// Metadata field carrying the base64 file key inside the meta document
pub const FILE_KEY_FIELD: &str = "file_key";

/// Metadata field carrying the base64 file salt inside the meta document
pub const FILE_SALT_FIELD: &str = "file_salt";

/// Caller-supplied cleartext metadata for an envelope (original filename,
/// send time, ...). Any JSON object except the two reserved key fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Empty metadata document
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// All fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build metadata from an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> RelayResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RelayError::InvalidMetadata(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Reject documents that would shadow the sealed key fields.
    pub(crate) fn check_reserved(&self) -> RelayResult<()> {
        for reserved in [FILE_KEY_FIELD, FILE_SALT_FIELD] {
            if self.0.contains_key(reserved) {
                return Err(RelayError::InvalidMetadata(format!(
                    "field '{}' is reserved",
                    reserved
                )));
            }
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
