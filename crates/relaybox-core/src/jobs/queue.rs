//! Multi-producer FIFO of pending jobs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use super::{Job, JobId};
use crate::error::{RelayError, RelayResult};

/// Cloneable, thread-safe handle for enqueueing jobs.
///
/// Backed by an unbounded channel: enqueue never blocks and needs no async
/// context, so plain threads can produce jobs too.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Box<dyn Job>>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Box<dyn Job>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                depth: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Append `job` to the tail of the queue.
    ///
    /// Fails only once the scheduler has shut down.
    pub fn enqueue<J: Job>(&self, job: J) -> RelayResult<JobId> {
        self.enqueue_boxed(Box::new(job))
    }

    /// Append an already boxed job.
    pub fn enqueue_boxed(&self, job: Box<dyn Job>) -> RelayResult<JobId> {
        let id = job.header().id();
        let kind = job.kind();

        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(RelayError::SchedulerStopped);
        }

        trace!(job_id = %id, kind, "Job enqueued");
        Ok(id)
    }

    /// Jobs enqueued but not yet picked up by the worker
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether the scheduler has stopped accepting jobs
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn mark_dequeued(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
