//! Upload spool
//!
//! Incoming payloads never sit on disk in the clear: [`Spool::stage`]
//! encrypts the stream under fresh transport key material as it is written.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use ulid::Ulid;

use super::TransportPayload;
use crate::crypto::stream::classify_io_error;
use crate::crypto::{EncryptingWriter, KeyMaterial};
use crate::error::RelayResult;

/// Extension of staged upload files
pub const SPOOL_SUFFIX: &str = "upload";

/// Directory of transport-encrypted uploads awaiting delivery.
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Use `dir` as the spool, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> RelayResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encrypt `source` into a new spool file.
    ///
    /// On error the partial file is removed.
    pub fn stage<R: Read>(&self, mut source: R) -> RelayResult<TransportPayload> {
        let key = KeyMaterial::generate();
        let path = self.dir.join(format!("{}.{}", Ulid::new(), SPOOL_SUFFIX));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        match write_encrypted(file, &mut source, &key) {
            Ok(len) => {
                debug!(path = %path.display(), len, "Staged upload");
                Ok(TransportPayload { path, key })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %cleanup, "Could not remove partial upload");
                }
                Err(e)
            }
        }
    }
}

fn write_encrypted<R: Read>(file: File, source: &mut R, key: &KeyMaterial) -> RelayResult<u64> {
    let mut writer = EncryptingWriter::new(BufWriter::new(file), key)?;
    let len = io::copy(source, &mut writer).map_err(classify_io_error)?;
    let file = writer.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(len)
}
