//! Relay configuration
//!
//! Loaded from a JSON file; every field has a default so a partial (or
//! empty) document is valid:
//!
//! ```json
//! {
//!   "principals_dir": "/var/lib/relaybox/principals",
//!   "spool_dir": "/var/lib/relaybox/spool",
//!   "remote_hosts": { "mail.example.org": "/mnt/example/principals" },
//!   "erase_block_size": 8192,
//!   "rsa_bits": 2048,
//!   "shutdown": "drain"
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::MIN_RSA_BITS;
use crate::eraser::{SecureEraser, DEFAULT_BLOCK_SIZE};
use crate::error::{RelayError, RelayResult};
use crate::jobs::ShutdownPolicy;
use crate::principal::FsPrincipalDirectory;

/// Data directory used when none is given
pub const DEFAULT_DATA_DIR: &str = ".relaybox";

/// Default RSA modulus size for generated keys
pub const DEFAULT_RSA_BITS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Root holding one directory per local principal
    pub principals_dir: PathBuf,
    /// Where uploads wait, transport-encrypted, until delivered
    pub spool_dir: PathBuf,
    /// Remote host name → principal root with the same layout
    pub remote_hosts: BTreeMap<String, PathBuf>,
    /// Overwrite block size for secure erasure
    pub erase_block_size: usize,
    /// Modulus size for newly generated keys
    pub rsa_bits: usize,
    /// What happens to queued jobs on shutdown
    pub shutdown: ShutdownPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::for_data_dir(DEFAULT_DATA_DIR)
    }
}

impl RelayConfig {
    /// Defaults with principals and spool under `data_dir`.
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            principals_dir: data_dir.join("principals"),
            spool_dir: data_dir.join("spool"),
            remote_hosts: BTreeMap::new(),
            erase_block_size: DEFAULT_BLOCK_SIZE,
            rsa_bits: DEFAULT_RSA_BITS,
            shutdown: ShutdownPolicy::default(),
        }
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Self = serde_json::from_str(&text)
            .map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))?;

        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        config.validate()?;

        debug!(path = %path.display(), ?config, "Loaded config");
        Ok(config)
    }

    /// Check value ranges and path sanity.
    pub fn validate(&self) -> RelayResult<()> {
        if self.erase_block_size == 0 {
            return Err(RelayError::Config(
                "erase_block_size must be greater than zero".to_string(),
            ));
        }
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(RelayError::Config(format!(
                "rsa_bits must be at least {} (got {})",
                MIN_RSA_BITS, self.rsa_bits
            )));
        }
        if self.principals_dir == self.spool_dir {
            return Err(RelayError::Config(
                "principals_dir and spool_dir must differ".to_string(),
            ));
        }
        if let Some((host, _)) = self.remote_hosts.iter().find(|(host, _)| host.trim().is_empty()) {
            return Err(RelayError::Config(format!("invalid remote host name {:?}", host)));
        }
        Ok(())
    }

    /// Filesystem directory for the configured roots.
    pub fn principal_directory(&self) -> FsPrincipalDirectory {
        self.remote_hosts.iter().fold(
            FsPrincipalDirectory::new(&self.principals_dir),
            |directory, (host, root)| directory.with_remote(host.clone(), root.clone()),
        )
    }

    pub fn eraser(&self) -> RelayResult<SecureEraser> {
        SecureEraser::new(self.erase_block_size)
    }

    fn resolve_relative(&mut self, base: &Path) {
        let absolutize = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        absolutize(&mut self.principals_dir);
        absolutize(&mut self.spool_dir);
        self.remote_hosts.values_mut().for_each(absolutize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.erase_block_size, 8192);
        assert_eq!(config.rsa_bits, 2048);
        assert_eq!(config.shutdown, ShutdownPolicy::Drain);
        assert!(config.remote_hosts.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_for_data_dir_layout() {
        let config = RelayConfig::for_data_dir("/srv/relay");
        assert_eq!(config.principals_dir, PathBuf::from("/srv/relay/principals"));
        assert_eq!(config.spool_dir, PathBuf::from("/srv/relay/spool"));
    }

    #[test]
    fn test_load_partial_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");
        fs::write(
            &path,
            r#"{
                "principals_dir": "people",
                "remote_hosts": { "far.example": "/mnt/far" },
                "shutdown": "discard"
            }"#,
        )
        .unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.principals_dir, dir.path().join("people"));
        assert_eq!(config.remote_hosts["far.example"], PathBuf::from("/mnt/far"));
        assert_eq!(config.shutdown, ShutdownPolicy::Discard);
        assert_eq!(config.erase_block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_load_empty_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");
        fs::write(&path, "{}").unwrap();
        assert!(RelayConfig::load(&path).is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = RelayConfig::default();
        config.erase_block_size = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = RelayConfig::default();
        config.rsa_bits = 1024;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = RelayConfig::default();
        config.spool_dir = config.principals_dir.clone();
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.remote_hosts.insert(" ".to_string(), PathBuf::from("/x"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");
        fs::write(&path, r#"{ "rsa_bits": "lots" }"#).unwrap();
        assert!(matches!(RelayConfig::load(&path), Err(RelayError::Config(_))));

        assert!(RelayConfig::load(dir.path().join("missing.json")).is_err());
    }
}
