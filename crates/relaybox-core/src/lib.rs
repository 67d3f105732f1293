//! relaybox Core Library
//!
//! Encrypted store-and-forward file relay.
//!
//! ## Overview
//!
//! An upload arrives encrypted under short-lived transport key material and
//! is staged in a spool. A background job re-encrypts ("transcodes") it into
//! a three-file envelope sealed for the recipient's RSA public key, mirrors a
//! second envelope into the sender's outbox, and finally overwrites and
//! deletes the spool file.
//!
//! ## Modules
//!
//! - [`crypto`]: AES stream transcoding and RSA key wrapping
//! - [`envelope`]: sealing, listing and opening envelopes
//! - [`eraser`]: multi-pass secure deletion
//! - [`jobs`]: job model, FIFO queue and single-worker scheduler
//! - [`principal`]: mailbox owners and how they are resolved
//! - [`relay`]: deliver / mirror / forward jobs, spool and sender notices
//! - [`engine`]: the [`Relay`] facade tying it together
//!
//! ## Quick Start
//!
//! ```ignore
//! use relaybox_core::{DeliveryRequest, LogNotifier, Metadata, Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::load("relay.json")?;
//!     let directory = Arc::new(config.principal_directory());
//!     let relay = Relay::start(config, directory, Arc::new(LogNotifier))?;
//!
//!     let payload = relay.spool().stage(std::io::stdin())?;
//!     relay.deliver(DeliveryRequest::new(payload, "alice", "bob", Metadata::new()))?;
//!
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod envelope;
pub mod eraser;
pub mod error;
pub mod jobs;
pub mod principal;
pub mod relay;

// Re-exports
pub use config::RelayConfig;
pub use crypto::{KeyMaterial, RsaPrivateKey, RsaPublicKey};
pub use engine::Relay;
pub use envelope::{EnvelopeNames, Metadata, OpenedEnvelope, SealedEnvelope};
pub use eraser::{EraseOutcome, SecureEraser};
pub use error::{RelayError, RelayResult};
pub use jobs::{
    EraseJob, Job, JobContext, JobEvent, JobHeader, JobId, JobOutcome, JobQueue, JobScheduler,
    SchedulerStats, ShutdownPolicy,
};
pub use principal::{
    validate_username, FsPrincipalDirectory, MemoryDirectory, Principal, PrincipalDirectory,
};
pub use relay::{
    DeliverJob, DeliveryRequest, EnvelopeNotifier, FailureNotice, ForwardJob, LogNotifier,
    MirrorJob, RelayContext, SenderNotifier, Spool, TransportPayload,
};
