//! Multi-pass secure erasure of spool files
//!
//! Before a temp file is unlinked its bytes are overwritten in place three
//! times so the transport-encrypted payload cannot be recovered by reading
//! freed blocks:
//!
//! | pass | pattern |
//! |------|---------|
//! | 0    | random  |
//! | 1    | zeros   |
//! | 2    | random  |
//!
//! Writes go block by block from offset 0; the cancellation token is polled
//! before every block. A cancelled erase abandons the current pass and runs
//! no further passes.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{RelayError, RelayResult};

/// Default overwrite block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Number of overwrite passes
pub const ERASE_PASSES: usize = 3;

/// Fill pattern for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPattern {
    Random,
    Zeros,
}

impl PassPattern {
    /// Pattern used by pass `index`
    pub fn for_pass(index: usize) -> Self {
        if index % 2 == 1 {
            PassPattern::Zeros
        } else {
            PassPattern::Random
        }
    }
}

/// What an erase call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    /// The file did not exist
    Missing,
    /// All passes ran over `len` bytes
    Completed { len: u64 },
    /// Cancelled during pass `pass`; that pass and later ones did not finish
    Cancelled { pass: usize },
}

/// Overwrites and deletes files.
#[derive(Debug, Clone, Copy)]
pub struct SecureEraser {
    block_size: usize,
}

impl Default for SecureEraser {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl SecureEraser {
    /// Eraser writing `block_size`-byte blocks.
    pub fn new(block_size: usize) -> RelayResult<Self> {
        if block_size == 0 {
            return Err(RelayError::Config("erase block size must be non-zero".to_string()));
        }
        Ok(Self { block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Overwrite `path` in place. Does not delete it.
    pub fn erase(&self, path: &Path, cancel: &CancellationToken) -> RelayResult<EraseOutcome> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Nothing to erase");
                return Ok(EraseOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        let block_size = self.block_size as u64;
        let mut block = Zeroizing::new(vec![0u8; self.block_size]);

        for pass in 0..ERASE_PASSES {
            let pattern = PassPattern::for_pass(pass);
            file.seek(SeekFrom::Start(0))?;

            let mut written: u64 = 0;
            while written < len {
                if cancel.is_cancelled() {
                    warn!(path = %path.display(), pass, written, "Erase cancelled");
                    return Ok(EraseOutcome::Cancelled { pass });
                }

                let chunk = (len - written).min(block_size) as usize;
                match pattern {
                    PassPattern::Random => rand::rng().fill_bytes(&mut block[..chunk]),
                    PassPattern::Zeros => block[..chunk].fill(0),
                }
                file.write_all(&block[..chunk])?;
                written += chunk as u64;
            }

            file.flush()?;
            file.sync_data()?;
            debug!(path = %path.display(), pass, ?pattern, "Erase pass complete");
        }

        Ok(EraseOutcome::Completed { len })
    }

    /// Erase `path` and then delete it.
    ///
    /// Deleting a file that is already gone is not an error. A cancelled
    /// erase still deletes the file.
    pub fn destroy(&self, path: &Path, cancel: &CancellationToken) -> RelayResult<EraseOutcome> {
        let outcome = self.erase(path, cancel)?;
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(path = %path.display(), ?outcome, "Destroyed file");
        Ok(outcome)
    }
}
