//! Deliver, mirror and forward jobs

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{DeliveryRequest, FailureNotice, RelayContext};
use crate::error::{RelayError, RelayResult};
use crate::jobs::{Job, JobContext, JobHeader, JobOutcome};
use crate::principal::Principal;

/// Seals an upload into the recipient's inbox, then chains a [`MirrorJob`].
#[derive(Debug)]
pub struct DeliverJob {
    header: JobHeader,
    request: DeliveryRequest,
    relay: RelayContext,
}

impl DeliverJob {
    pub fn new(request: DeliveryRequest, relay: RelayContext) -> Self {
        Self {
            header: JobHeader::new(),
            request,
            relay,
        }
    }

    pub fn request(&self) -> &DeliveryRequest {
        &self.request
    }
}

impl Job for DeliverJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn kind(&self) -> &'static str {
        "deliver"
    }

    fn can_execute(&self, _now: DateTime<Utc>) -> bool {
        self.request.payload.path.exists()
    }

    fn execute(&mut self, ctx: &JobContext) -> RelayResult<()> {
        let recipient = self.relay.directory.resolve(&self.request.recipient)?;
        let key = recipient.require_public_key()?;

        let sealed = self
            .request
            .payload
            .seal_into(&recipient.inbox, key, &self.request.metadata)?;
        info!(
            sender = %self.request.sender,
            recipient = %recipient.username,
            ordinal = sealed.names.ordinal,
            "Delivered to inbox"
        );

        chain_mirror(ctx, &self.header, &self.request, &self.relay)
    }

    fn on_error(&mut self, _ctx: &JobContext, error: &RelayError) {
        warn!(
            sender = %self.request.sender,
            recipient = %self.request.recipient,
            resolution = error.is_resolution(),
            error = %error,
            "Delivery failed"
        );
    }

    fn on_completed(&mut self, ctx: &JobContext, _outcome: &JobOutcome) {
        self.relay
            .schedule_erase(ctx, &self.header, &self.request.payload.path);
    }

    fn on_discarded(&mut self) {
        self.relay.erase_now(&self.request.payload.path);
    }
}

/// Seals a copy of an upload into the sender's own outbox.
#[derive(Debug)]
pub struct MirrorJob {
    header: JobHeader,
    request: DeliveryRequest,
    relay: RelayContext,
}

impl MirrorJob {
    pub fn new(request: DeliveryRequest, relay: RelayContext) -> Self {
        Self::with_header(JobHeader::new(), request, relay)
    }

    pub(crate) fn with_header(header: JobHeader, request: DeliveryRequest, relay: RelayContext) -> Self {
        Self {
            header,
            request,
            relay,
        }
    }

    pub fn request(&self) -> &DeliveryRequest {
        &self.request
    }
}

impl Job for MirrorJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn kind(&self) -> &'static str {
        "mirror"
    }

    fn can_execute(&self, _now: DateTime<Utc>) -> bool {
        self.request.payload.path.exists()
    }

    fn execute(&mut self, _ctx: &JobContext) -> RelayResult<()> {
        let sender = self.relay.directory.resolve(&self.request.sender)?;
        let key = sender.require_public_key()?;

        let sealed = self
            .request
            .payload
            .seal_into(&sender.outbox, key, &self.request.metadata)?;
        info!(
            sender = %sender.username,
            ordinal = sealed.names.ordinal,
            "Mirrored to outbox"
        );
        Ok(())
    }

    fn on_error(&mut self, _ctx: &JobContext, error: &RelayError) {
        warn!(sender = %self.request.sender, error = %error, "Mirror failed");
    }

    fn on_completed(&mut self, ctx: &JobContext, _outcome: &JobOutcome) {
        self.relay
            .schedule_erase(ctx, &self.header, &self.request.payload.path);
    }

    fn on_discarded(&mut self) {
        self.relay.erase_now(&self.request.payload.path);
    }
}

/// Seals an upload into a principal's inbox on a remote host.
///
/// An unknown host or recipient is reported to the sender through the
/// [`SenderNotifier`](super::SenderNotifier) and is not a job failure.
#[derive(Debug)]
pub struct ForwardJob {
    header: JobHeader,
    host: String,
    request: DeliveryRequest,
    relay: RelayContext,
}

impl ForwardJob {
    pub fn new(host: impl Into<String>, request: DeliveryRequest, relay: RelayContext) -> Self {
        Self {
            header: JobHeader::new(),
            host: host.into(),
            request,
            relay,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn resolve_target(&self) -> RelayResult<Principal> {
        let principal = self
            .relay
            .directory
            .resolve_remote(&self.host, &self.request.recipient)?;
        principal.require_public_key()?;
        Ok(principal)
    }
}

impl Job for ForwardJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn kind(&self) -> &'static str {
        "forward"
    }

    fn can_execute(&self, _now: DateTime<Utc>) -> bool {
        self.request.payload.path.exists()
    }

    fn execute(&mut self, ctx: &JobContext) -> RelayResult<()> {
        let recipient = match self.resolve_target() {
            Ok(principal) => principal,
            Err(e) if e.is_resolution() => {
                warn!(
                    host = %self.host,
                    recipient = %self.request.recipient,
                    error = %e,
                    "Remote recipient unknown, notifying sender"
                );
                let notice =
                    FailureNotice::new(&self.request, Some(&self.host), e.to_string(), self.header.id());
                return self.relay.notifier.notify(&notice);
            }
            Err(e) => return Err(e),
        };
        let key = recipient.require_public_key()?;

        let sealed = self
            .request
            .payload
            .seal_into(&recipient.inbox, key, &self.request.metadata)?;
        info!(
            host = %self.host,
            recipient = %recipient.username,
            ordinal = sealed.names.ordinal,
            "Forwarded to remote inbox"
        );

        chain_mirror(ctx, &self.header, &self.request, &self.relay)
    }

    fn on_error(&mut self, _ctx: &JobContext, error: &RelayError) {
        warn!(
            host = %self.host,
            recipient = %self.request.recipient,
            error = %error,
            "Forward failed"
        );
    }

    fn on_completed(&mut self, ctx: &JobContext, _outcome: &JobOutcome) {
        self.relay
            .schedule_erase(ctx, &self.header, &self.request.payload.path);
    }

    fn on_discarded(&mut self) {
        self.relay.erase_now(&self.request.payload.path);
    }
}

fn chain_mirror(
    ctx: &JobContext,
    header: &JobHeader,
    request: &DeliveryRequest,
    relay: &RelayContext,
) -> RelayResult<()> {
    let mirror = MirrorJob::with_header(header.related(), request.clone(), relay.clone());
    ctx.enqueue(mirror)?;
    Ok(())
}
