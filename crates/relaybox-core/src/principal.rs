//! Principals and the directory that resolves them
//!
//! A principal is a named mailbox owner: an inbox that receives envelopes
//! sealed for them, an outbox archiving what they sent, and (optionally) the
//! RSA public key envelopes are sealed against.
//!
//! On disk ([`FsPrincipalDirectory`]) each principal is a directory:
//!
//! ```text
//! <root>/
//!   alice/
//!     inbox/        envelopes addressed to alice
//!     outbox/       mirrors of envelopes alice sent
//!     public.pem    SPKI public key (absent = cannot receive)
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::crypto::{public_key_from_pem, public_key_to_pem, RsaPublicKey};
use crate::error::{RelayError, RelayResult};

/// Subdirectory receiving envelopes addressed to a principal
pub const INBOX_DIR: &str = "inbox";

/// Subdirectory archiving envelopes a principal sent
pub const OUTBOX_DIR: &str = "outbox";

/// File holding a principal's public key
pub const PUBLIC_KEY_FILE: &str = "public.pem";

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 64;

/// A resolved mailbox owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub inbox: PathBuf,
    pub outbox: PathBuf,
    pub public_key: Option<RsaPublicKey>,
}

impl Principal {
    pub fn new(username: impl Into<String>, inbox: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            inbox: inbox.into(),
            outbox: outbox.into(),
            public_key: None,
        }
    }

    pub fn with_public_key(mut self, key: RsaPublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    /// The key to seal against, or a resolution error if there is none.
    pub fn require_public_key(&self) -> RelayResult<&RsaPublicKey> {
        self.public_key
            .as_ref()
            .ok_or_else(|| RelayError::MissingPublicKey(self.username.clone()))
    }
}

/// Resolves usernames to principals.
pub trait PrincipalDirectory: Send + Sync {
    /// Look up a local principal.
    fn resolve(&self, username: &str) -> RelayResult<Principal>;

    /// Look up a principal on a remote host.
    ///
    /// The default directory knows no remote hosts.
    fn resolve_remote(&self, host: &str, _username: &str) -> RelayResult<Principal> {
        Err(RelayError::UnknownRemoteHost(host.to_string()))
    }
}

/// Reject usernames that could escape a principal root.
///
/// Accepts 1 to 64 characters from `[A-Za-z0-9._-]`, not starting with `.`.
pub fn validate_username(username: &str) -> RelayResult<()> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && !username.starts_with('.')
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(RelayError::InvalidUsername(username.to_string()))
    }
}

/// Directory backed by a principal root on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsPrincipalDirectory {
    root: PathBuf,
    remotes: HashMap<String, PathBuf>,
}

impl FsPrincipalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remotes: HashMap::new(),
        }
    }

    /// Map `host` to another principal root with the same layout.
    pub fn with_remote(mut self, host: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.remotes.insert(host.into(), root.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the inbox/outbox layout for `username` without a key.
    pub fn create(&self, username: &str) -> RelayResult<Principal> {
        validate_username(username)?;
        let dir = self.root.join(username);
        fs::create_dir_all(dir.join(INBOX_DIR))?;
        fs::create_dir_all(dir.join(OUTBOX_DIR))?;
        load_principal(&self.root, username)
    }

    /// Create the layout for `username` and store their public key.
    ///
    /// Replaces any key already registered.
    pub fn register(&self, username: &str, key: &RsaPublicKey) -> RelayResult<Principal> {
        self.create(username)?;
        let pem = public_key_to_pem(key)?;
        fs::write(self.root.join(username).join(PUBLIC_KEY_FILE), pem)?;
        info!(username, root = %self.root.display(), "Registered principal");
        load_principal(&self.root, username)
    }
}

impl PrincipalDirectory for FsPrincipalDirectory {
    fn resolve(&self, username: &str) -> RelayResult<Principal> {
        load_principal(&self.root, username)
    }

    fn resolve_remote(&self, host: &str, username: &str) -> RelayResult<Principal> {
        let root = self
            .remotes
            .get(host)
            .ok_or_else(|| RelayError::UnknownRemoteHost(host.to_string()))?;
        load_principal(root, username)
    }
}

fn load_principal(root: &Path, username: &str) -> RelayResult<Principal> {
    validate_username(username)?;
    let dir = root.join(username);
    if !dir.is_dir() {
        return Err(RelayError::PrincipalNotFound(username.to_string()));
    }

    let public_key = match fs::read_to_string(dir.join(PUBLIC_KEY_FILE)) {
        Ok(pem) => Some(public_key_from_pem(&pem)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    debug!(username, has_key = public_key.is_some(), "Resolved principal");

    Ok(Principal {
        username: username.to_string(),
        inbox: dir.join(INBOX_DIR),
        outbox: dir.join(OUTBOX_DIR),
        public_key,
    })
}

/// In-process directory for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    local: RwLock<HashMap<String, Principal>>,
    remote: RwLock<HashMap<String, HashMap<String, Principal>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, principal: Principal) -> RelayResult<()> {
        validate_username(&principal.username)?;
        self.local.write().insert(principal.username.clone(), principal);
        Ok(())
    }

    pub fn insert_remote(&self, host: impl Into<String>, principal: Principal) -> RelayResult<()> {
        validate_username(&principal.username)?;
        self.remote
            .write()
            .entry(host.into())
            .or_default()
            .insert(principal.username.clone(), principal);
        Ok(())
    }
}

impl PrincipalDirectory for MemoryDirectory {
    fn resolve(&self, username: &str) -> RelayResult<Principal> {
        validate_username(username)?;
        self.local
            .read()
            .get(username)
            .cloned()
            .ok_or_else(|| RelayError::PrincipalNotFound(username.to_string()))
    }

    fn resolve_remote(&self, host: &str, username: &str) -> RelayResult<Principal> {
        validate_username(username)?;
        let remote = self.remote.read();
        let principals = remote
            .get(host)
            .ok_or_else(|| RelayError::UnknownRemoteHost(host.to_string()))?;
        principals
            .get(username)
            .cloned()
            .ok_or_else(|| RelayError::PrincipalNotFound(username.to_string()))
    }
}
