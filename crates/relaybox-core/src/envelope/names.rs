//! Envelope file naming and ordinal reservation

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};

/// Suffix of the payload ciphertext file
pub const DATA_SUFFIX: &str = "data";

/// Suffix of the metadata ciphertext file
pub const META_SUFFIX: &str = "meta";

/// Suffix of the RSA-wrapped meta key file
pub const META_KEY_SUFFIX: &str = "metakey";

/// Paths of the three files making up one envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeNames {
    /// Directory-unique ordinal shared by the three files
    pub ordinal: u64,
    /// `<n>.data`
    pub data: PathBuf,
    /// `<n>.meta`
    pub meta: PathBuf,
    /// `<n>.metakey`
    pub meta_key: PathBuf,
}

impl EnvelopeNames {
    /// Names for `ordinal` inside `dir`.
    pub fn for_ordinal(dir: &Path, ordinal: u64) -> Self {
        Self {
            ordinal,
            data: dir.join(format!("{}.{}", ordinal, DATA_SUFFIX)),
            meta: dir.join(format!("{}.{}", ordinal, META_SUFFIX)),
            meta_key: dir.join(format!("{}.{}", ordinal, META_KEY_SUFFIX)),
        }
    }

    /// Hidden file the meta key is written to before publication.
    pub(crate) fn staging_meta_key(&self) -> PathBuf {
        let name = format!(".{}.{}.partial", self.ordinal, META_KEY_SUFFIX);
        match self.meta_key.parent() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Whether the envelope has been published (its meta-key file exists).
    pub fn is_committed(&self) -> bool {
        self.meta_key.exists()
    }

    /// All three final paths
    pub fn paths(&self) -> [&Path; 3] {
        [&self.data, &self.meta, &self.meta_key]
    }
}

/// Exclusive claim on one ordinal in a directory.
///
/// Until [`commit`](Reservation::commit) succeeds, dropping the reservation
/// deletes every file it created.
pub(crate) struct Reservation {
    names: EnvelopeNames,
    armed: bool,
}

impl Reservation {
    /// Claim the lowest free ordinal in `dir`, returning the freshly created
    /// (empty) data and meta files.
    pub(crate) fn acquire(dir: &Path) -> RelayResult<(Self, File, File)> {
        let mut ordinal: u64 = 0;
        loop {
            let names = EnvelopeNames::for_ordinal(dir, ordinal);
            if !names.meta_key.exists() && !names.staging_meta_key().exists() {
                match create_new(&names.data) {
                    Ok(data) => match create_new(&names.meta) {
                        Ok(meta) => {
                            debug!(dir = %dir.display(), ordinal, "Reserved envelope ordinal");
                            return Ok((
                                Self {
                                    names,
                                    armed: true,
                                },
                                data,
                                meta,
                            ));
                        }
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                            drop(data);
                            remove_quietly(&names.data);
                        }
                        Err(e) => {
                            drop(data);
                            remove_quietly(&names.data);
                            return Err(e.into());
                        }
                    },
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e.into()),
                }
            }
            ordinal = ordinal
                .checked_add(1)
                .ok_or_else(|| RelayError::NamesExhausted(dir.to_path_buf()))?;
        }
    }

    pub(crate) fn names(&self) -> &EnvelopeNames {
        &self.names
    }

    /// Create the staging file for the wrapped meta key.
    pub(crate) fn create_staging(&self) -> RelayResult<File> {
        Ok(create_new(&self.names.staging_meta_key())?)
    }

    /// Publish the envelope by moving the meta key into place.
    pub(crate) fn commit(mut self) -> RelayResult<EnvelopeNames> {
        fs::rename(self.names.staging_meta_key(), &self.names.meta_key)?;
        self.armed = false;
        Ok(self.names.clone())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                ordinal = self.names.ordinal,
                "Removing partial envelope"
            );
            remove_quietly(&self.names.data);
            remove_quietly(&self.names.meta);
            remove_quietly(&self.names.staging_meta_key());
        }
    }
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_names_for_ordinal() {
        let names = EnvelopeNames::for_ordinal(Path::new("/inbox"), 7);
        assert_eq!(names.data, PathBuf::from("/inbox/7.data"));
        assert_eq!(names.meta, PathBuf::from("/inbox/7.meta"));
        assert_eq!(names.meta_key, PathBuf::from("/inbox/7.metakey"));
        assert_eq!(
            names.staging_meta_key(),
            PathBuf::from("/inbox/.7.metakey.partial")
        );
    }

    #[test]
    fn test_first_reservation_is_zero() {
        let dir = tempdir().unwrap();
        let (reservation, _, _) = Reservation::acquire(dir.path()).unwrap();
        assert_eq!(reservation.names().ordinal, 0);
        assert!(reservation.names().data.exists());
        assert!(reservation.names().meta.exists());
    }

    #[test]
    fn test_reservation_skips_taken_ordinals() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("0.data"), b"x").unwrap();
        std::fs::write(dir.path().join("1.meta"), b"x").unwrap();
        std::fs::write(dir.path().join("2.metakey"), b"x").unwrap();

        let (reservation, _, _) = Reservation::acquire(dir.path()).unwrap();
        assert_eq!(reservation.names().ordinal, 3);
        // The failed claim on ordinal 1 must not leave its data file behind
        assert!(!dir.path().join("1.data").exists());
    }

    #[test]
    fn test_concurrent_reservations_are_distinct() {
        let dir = tempdir().unwrap();
        let (a, _, _) = Reservation::acquire(dir.path()).unwrap();
        let (b, _, _) = Reservation::acquire(dir.path()).unwrap();
        assert_ne!(a.names().ordinal, b.names().ordinal);
    }

    #[test]
    fn test_drop_removes_files() {
        let dir = tempdir().unwrap();
        let names = {
            let (reservation, _, _) = Reservation::acquire(dir.path()).unwrap();
            drop(reservation.create_staging().unwrap());
            reservation.names().clone()
        };
        assert!(!names.data.exists());
        assert!(!names.meta.exists());
        assert!(!names.staging_meta_key().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_publishes_meta_key() {
        let dir = tempdir().unwrap();
        let (reservation, _, _) = Reservation::acquire(dir.path()).unwrap();
        drop(reservation.create_staging().unwrap());
        let names = reservation.commit().unwrap();

        assert!(names.is_committed());
        assert!(names.data.exists());
        assert!(!names.staging_meta_key().exists());
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let result = Reservation::acquire(&dir.path().join("absent"));
        assert!(matches!(result, Err(RelayError::Io(_))));
    }
}
