//! Relay pipeline
//!
//! Uploads arrive as spool files encrypted under transport key material.
//! The pipeline turns each one into envelopes:
//!
//! ```text
//! DeliverJob ──ok──▶ MirrorJob          (recipient inbox, then sender outbox)
//! ForwardJob ──ok──▶ MirrorJob          (remote inbox, then sender outbox)
//!      │  unknown remote ──▶ SenderNotifier, no envelope
//!      └──────────── on_completed ──▶ EraseJob(spool file)
//! ```
//!
//! Every relay job schedules erasure of its spool file when it finishes,
//! whatever the outcome. The mirror is chained during `execute`, so it is
//! queued ahead of the erase and still finds the file; later erase requests
//! for the same file are skipped once it is gone. A relay job dropped by a
//! discarding shutdown erases its spool file on the spot.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crypto::{KeyMaterial, RsaPublicKey};
use crate::envelope::{self, Metadata, SealedEnvelope};
use crate::eraser::SecureEraser;
use crate::error::RelayResult;
use crate::jobs::{EraseJob, JobContext, JobHeader};
use crate::principal::PrincipalDirectory;

mod deliver;
mod notify;
mod spool;

pub use deliver::{DeliverJob, ForwardJob, MirrorJob};
pub use notify::{EnvelopeNotifier, FailureNotice, LogNotifier, SenderNotifier, NOTICE_KIND};
pub use spool::{Spool, SPOOL_SUFFIX};

/// An uploaded file and the key material it is encrypted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPayload {
    pub path: PathBuf,
    pub key: KeyMaterial,
}

impl TransportPayload {
    pub fn new(path: impl Into<PathBuf>, key: KeyMaterial) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    /// Seal this payload into `dir` for `recipient`.
    pub fn seal_into(
        &self,
        dir: &Path,
        recipient: &RsaPublicKey,
        metadata: &Metadata,
    ) -> RelayResult<SealedEnvelope> {
        let source = BufReader::new(File::open(&self.path)?);
        envelope::seal(dir, source, &self.key, recipient, metadata)
    }
}

/// What to relay, from whom, to whom.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub payload: TransportPayload,
    pub sender: String,
    pub recipient: String,
    pub metadata: Metadata,
}

impl DeliveryRequest {
    pub fn new(
        payload: TransportPayload,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            payload,
            sender: sender.into(),
            recipient: recipient.into(),
            metadata,
        }
    }
}

/// Collaborators shared by every relay job.
#[derive(Clone)]
pub struct RelayContext {
    pub directory: Arc<dyn PrincipalDirectory>,
    pub notifier: Arc<dyn SenderNotifier>,
    pub eraser: SecureEraser,
}

impl RelayContext {
    pub fn new(
        directory: Arc<dyn PrincipalDirectory>,
        notifier: Arc<dyn SenderNotifier>,
        eraser: SecureEraser,
    ) -> Self {
        Self {
            directory,
            notifier,
            eraser,
        }
    }

    /// Queue secure erasure of a spool file behind everything already queued.
    pub(crate) fn schedule_erase(&self, ctx: &JobContext, header: &JobHeader, path: &Path) {
        let job = EraseJob::with_header(header.related(), path, self.eraser);
        if let Err(e) = ctx.enqueue(job) {
            warn!(path = %path.display(), error = %e, "Could not schedule spool erasure, erasing now");
            self.erase_now(path);
        }
    }

    /// Erase a spool file on the calling thread.
    pub(crate) fn erase_now(&self, path: &Path) {
        match self.eraser.destroy(path, &CancellationToken::new()) {
            Ok(outcome) => debug!(path = %path.display(), ?outcome, "Spool file erased"),
            Err(e) => warn!(path = %path.display(), error = %e, "Spool erasure failed"),
        }
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("eraser", &self.eraser)
            .finish_non_exhaustive()
    }
}
