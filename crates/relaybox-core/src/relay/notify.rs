//! Failure notices back to the sender

use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::DeliveryRequest;
use crate::envelope::{seal_plaintext, Metadata};
use crate::error::RelayResult;
use crate::jobs::JobId;
use crate::principal::PrincipalDirectory;

/// `kind` metadata value of a sealed notice
pub const NOTICE_KIND: &str = "delivery_failure";

/// A relay the sender asked for could not be carried out.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureNotice {
    pub job_id: JobId,
    pub sender: String,
    pub recipient: String,
    pub host: Option<String>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    /// Metadata the sender attached to the upload
    pub original: Metadata,
}

impl FailureNotice {
    pub fn new(
        request: &DeliveryRequest,
        host: Option<&str>,
        reason: impl Into<String>,
        job_id: JobId,
    ) -> Self {
        Self {
            job_id,
            sender: request.sender.clone(),
            recipient: request.recipient.clone(),
            host: host.map(str::to_string),
            reason: reason.into(),
            failed_at: Utc::now(),
            original: request.metadata.clone(),
        }
    }

    /// Notice rendered as envelope metadata.
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new()
            .with("kind", NOTICE_KIND)
            .with("job_id", self.job_id.to_string())
            .with("recipient", self.recipient.as_str())
            .with("reason", self.reason.as_str())
            .with("failed_at", self.failed_at.to_rfc3339())
            .with("original", Value::Object(self.original.fields().clone()));
        if let Some(host) = &self.host {
            metadata.insert("host", host.as_str());
        }
        metadata
    }
}

/// Tells a sender that their upload went nowhere.
pub trait SenderNotifier: Send + Sync {
    fn notify(&self, notice: &FailureNotice) -> RelayResult<()>;
}

/// Writes notices to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SenderNotifier for LogNotifier {
    fn notify(&self, notice: &FailureNotice) -> RelayResult<()> {
        warn!(
            job_id = %notice.job_id,
            sender = %notice.sender,
            recipient = %notice.recipient,
            host = ?notice.host,
            reason = %notice.reason,
            "Delivery failure notice"
        );
        Ok(())
    }
}

/// Seals each notice as an empty envelope into the sender's own inbox.
///
/// The notice lives entirely in the envelope metadata, so it is readable
/// with the sender's private key like any other delivery.
pub struct EnvelopeNotifier {
    directory: Arc<dyn PrincipalDirectory>,
}

impl EnvelopeNotifier {
    pub fn new(directory: Arc<dyn PrincipalDirectory>) -> Self {
        Self { directory }
    }
}

impl SenderNotifier for EnvelopeNotifier {
    fn notify(&self, notice: &FailureNotice) -> RelayResult<()> {
        let sender = self.directory.resolve(&notice.sender)?;
        let key = sender.require_public_key()?;

        let sealed = seal_plaintext(&sender.inbox, io::empty(), key, &notice.to_metadata())?;
        info!(
            job_id = %notice.job_id,
            sender = %sender.username,
            ordinal = sealed.names.ordinal,
            "Sealed failure notice"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_keypair, KeyMaterial, RsaPublicKey};
    use crate::envelope::{list, open};
    use crate::principal::FsPrincipalDirectory;
    use crate::relay::TransportPayload;
    use tempfile::tempdir;

    fn request() -> DeliveryRequest {
        DeliveryRequest::new(
            TransportPayload::new("/spool/x.upload", KeyMaterial::generate()),
            "alice",
            "zed",
            Metadata::new().with("filename", "plan.pdf"),
        )
    }

    #[test]
    fn test_notice_metadata() {
        let notice = FailureNotice::new(&request(), Some("far.example"), "no such host", JobId::new());
        let metadata = notice.to_metadata();

        assert_eq!(metadata.get_str("kind"), Some(NOTICE_KIND));
        assert_eq!(metadata.get_str("recipient"), Some("zed"));
        assert_eq!(metadata.get_str("host"), Some("far.example"));
        assert_eq!(
            metadata.get("original").and_then(|v| v.get("filename")),
            Some(&Value::from("plan.pdf"))
        );
    }

    #[test]
    fn test_log_notifier_accepts_everything() {
        let notice = FailureNotice::new(&request(), None, "gone", JobId::new());
        assert!(LogNotifier.notify(&notice).is_ok());
    }

    #[test]
    fn test_envelope_notifier_seals_into_sender_inbox() {
        let dir = tempdir().unwrap();
        let secret = generate_keypair(2048).unwrap();
        let directory = Arc::new(FsPrincipalDirectory::new(dir.path()));
        let alice = directory
            .register("alice", &RsaPublicKey::from(&secret))
            .unwrap();

        let notifier = EnvelopeNotifier::new(directory);
        let notice = FailureNotice::new(&request(), Some("far.example"), "unknown host", JobId::new());
        notifier.notify(&notice).unwrap();

        let envelopes = list(&alice.inbox).unwrap();
        assert_eq!(envelopes.len(), 1);

        let opened = open(&alice.inbox, envelopes[0].ordinal, &secret).unwrap();
        assert_eq!(opened.metadata().get_str("reason"), Some("unknown host"));
        let mut payload = Vec::new();
        assert_eq!(opened.decrypt_to(&mut payload).unwrap(), 0);
    }
}
