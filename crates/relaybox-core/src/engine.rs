//! Relay - the primary entry point for relaybox
//!
//! Relay owns the job scheduler and wires the principal directory, sender
//! notifier and spool into the relay jobs.
//!
//! # Example
//!
//! ```ignore
//! use relaybox_core::{DeliveryRequest, LogNotifier, Metadata, Relay, RelayConfig};
//!
//! let config = RelayConfig::for_data_dir("/var/lib/relaybox");
//! let directory = Arc::new(config.principal_directory());
//! let relay = Relay::start(config, directory, Arc::new(LogNotifier))?;
//!
//! let payload = relay.spool().stage(upload_stream)?;
//! relay.deliver(DeliveryRequest::new(payload, "alice", "bob", Metadata::new()))?;
//!
//! relay.shutdown().await;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::jobs::{
    EraseJob, JobEvent, JobId, JobQueue, JobScheduler, SchedulerStats, ShutdownPolicy,
};
use crate::principal::PrincipalDirectory;
use crate::relay::{
    DeliverJob, DeliveryRequest, ForwardJob, RelayContext, SenderNotifier, Spool,
};

/// A running relay.
pub struct Relay {
    config: RelayConfig,
    scheduler: JobScheduler,
    context: RelayContext,
    spool: Spool,
}

impl Relay {
    /// Validate `config`, open the spool and start the worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: RelayConfig,
        directory: Arc<dyn PrincipalDirectory>,
        notifier: Arc<dyn SenderNotifier>,
    ) -> RelayResult<Self> {
        config.validate()?;
        let eraser = config.eraser()?;
        let spool = Spool::open(&config.spool_dir)?;
        let scheduler = JobScheduler::start(config.shutdown);

        info!(
            principals = %config.principals_dir.display(),
            spool = %config.spool_dir.display(),
            remote_hosts = config.remote_hosts.len(),
            "Relay started"
        );

        Ok(Self {
            context: RelayContext::new(directory, notifier, eraser),
            config,
            scheduler,
            spool,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Where uploads are staged before delivery
    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Queue delivery to a local recipient (mirrored to the sender on success).
    pub fn deliver(&self, request: DeliveryRequest) -> RelayResult<JobId> {
        self.scheduler
            .queue()
            .enqueue(DeliverJob::new(request, self.context.clone()))
    }

    /// Queue delivery to a recipient on `host`.
    pub fn forward(&self, host: impl Into<String>, request: DeliveryRequest) -> RelayResult<JobId> {
        self.scheduler
            .queue()
            .enqueue(ForwardJob::new(host, request, self.context.clone()))
    }

    /// Queue secure erasure of an arbitrary file.
    pub fn erase(&self, path: impl Into<PathBuf>) -> RelayResult<JobId> {
        self.scheduler
            .queue()
            .enqueue(EraseJob::new(path, self.context.eraser))
    }

    pub fn queue(&self) -> JobQueue {
        self.scheduler.queue()
    }

    /// Subscribe to job completion events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop under the configured shutdown policy.
    pub async fn shutdown(self) -> SchedulerStats {
        self.scheduler.shutdown().await
    }

    /// Stop under `policy`, overriding the configured one.
    pub async fn shutdown_with(self, policy: ShutdownPolicy) -> SchedulerStats {
        self.scheduler.shutdown_with(policy).await
    }
}
