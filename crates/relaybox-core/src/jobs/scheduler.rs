//! Background job scheduler
//!
//! A single worker task drains the [`JobQueue`] in FIFO order. Each job's
//! lifecycle runs on tokio's blocking pool (job bodies do synchronous file
//! I/O), and the worker awaits it before taking the next job, so relay jobs
//! execute strictly one after another.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  JobScheduler                                                 │
//! │  ├── queue: JobQueue (unbounded mpsc sender, cloneable)       │
//! │  ├── worker: JoinHandle                                       │
//! │  │   └── recv → spawn_blocking(lifecycle) → event → recv ...  │
//! │  ├── stop: CancellationToken                                  │
//! │  └── event_tx: broadcast::Sender<JobEvent>                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shutdown
//!
//! The job in flight is always awaited. With [`ShutdownPolicy::Drain`] the
//! worker then runs every job still queued, including jobs chained during
//! the drain. With [`ShutdownPolicy::Discard`] the in-flight job is asked to
//! cancel and queued jobs are dropped unrun, each getting
//! [`Job::on_discarded`] on the blocking pool.
//!
//! Either way the channel is closed before the worker exits and then read
//! until it reports no senders can deliver anything more, so an `enqueue`
//! that returned `Ok` is always either run or discarded.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use super::{Job, JobContext, JobId, JobOutcome, JobQueue};
use crate::error::RelayError;

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What happens to queued jobs when the scheduler stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run everything still queued before stopping
    #[default]
    Drain,
    /// Cancel the running job and drop the rest
    Discard,
}

/// Emitted once per dequeued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The job ran (or was skipped) and its callbacks fired
    Finished {
        id: JobId,
        kind: &'static str,
        outcome: JobOutcome,
    },
    /// The job was dropped unrun during a discarding shutdown
    Discarded { id: JobId, kind: &'static str },
}

/// Running totals of job outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }

    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::Failed(_) => &self.failed,
            JobOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// State shared between the scheduler handle and its worker
struct Shared {
    queue: JobQueue,
    event_tx: broadcast::Sender<JobEvent>,
    counters: Counters,
    policy: Mutex<ShutdownPolicy>,
    stop: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

/// Owner of the background worker.
///
/// # Example
///
/// ```ignore
/// let scheduler = JobScheduler::start(ShutdownPolicy::Drain);
/// let queue = scheduler.queue();
///
/// queue.enqueue(EraseJob::new(spool_file, SecureEraser::default()))?;
///
/// let stats = scheduler.shutdown().await;
/// assert_eq!(stats.completed, 1);
/// ```
pub struct JobScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl JobScheduler {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn start(policy: ShutdownPolicy) -> Self {
        let (queue, rx) = JobQueue::channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            queue,
            event_tx,
            counters: Counters::default(),
            policy: Mutex::new(policy),
            stop: CancellationToken::new(),
            current: Mutex::new(None),
        });

        let worker = tokio::spawn(Self::worker_loop(shared.clone(), rx));
        info!(?policy, "Job scheduler started");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Handle for enqueueing jobs
    pub fn queue(&self) -> JobQueue {
        self.shared.queue.clone()
    }

    /// Subscribe to job events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    pub fn policy(&self) -> ShutdownPolicy {
        *self.shared.policy.lock()
    }

    /// Stop with the policy given at start.
    pub async fn shutdown(self) -> SchedulerStats {
        let policy = self.policy();
        self.shutdown_with(policy).await
    }

    /// Stop with an explicit policy and wait for the worker to exit.
    pub async fn shutdown_with(mut self, policy: ShutdownPolicy) -> SchedulerStats {
        info!(?policy, "Job scheduler stopping");
        *self.shared.policy.lock() = policy;
        self.shared.stop.cancel();
        if policy == ShutdownPolicy::Discard {
            if let Some(token) = self.shared.current.lock().as_ref() {
                token.cancel();
            }
        }

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "Job worker terminated abnormally");
            }
        }

        let stats = self.stats();
        info!(?stats, "Job scheduler stopped");
        stats
    }

    async fn worker_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Box<dyn Job>>) {
        debug!("Job worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shared.stop.cancelled() => None,
                job = rx.recv() => job,
            };
            match next {
                Some(job) => Self::run_job(&shared, job).await,
                None => break,
            }
        }

        let policy = *shared.policy.lock();
        match policy {
            ShutdownPolicy::Drain => {
                // Chained jobs can still be enqueued while the queue is open
                while let Ok(job) = rx.try_recv() {
                    Self::run_job(&shared, job).await;
                }
                rx.close();
                while let Some(job) = rx.recv().await {
                    Self::run_job(&shared, job).await;
                }
            }
            ShutdownPolicy::Discard => {
                rx.close();
                while let Some(job) = rx.recv().await {
                    Self::discard_job(&shared, job).await;
                }
            }
        }

        debug!("Job worker exited");
    }

    async fn discard_job(shared: &Arc<Shared>, mut job: Box<dyn Job>) {
        shared.queue.mark_dequeued();

        let id = job.header().id();
        let kind = job.kind();
        debug!(job_id = %id, kind, "Discarding queued job");

        let span = info_span!("job", job_id = %id, kind);
        let handle = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            job.on_discarded();
        });
        if let Err(e) = handle.await {
            error!(job_id = %id, kind, error = %e, "Discard hook panicked");
        }

        shared.counters.discarded.fetch_add(1, Ordering::SeqCst);
        let _ = shared.event_tx.send(JobEvent::Discarded { id, kind });
    }

    async fn run_job(shared: &Arc<Shared>, mut job: Box<dyn Job>) {
        shared.queue.mark_dequeued();

        let id = job.header().id();
        let kind = job.kind();
        let cancel = job.header().cancel_token().clone();
        *shared.current.lock() = Some(cancel.clone());
        if shared.stop.is_cancelled() && *shared.policy.lock() == ShutdownPolicy::Discard {
            cancel.cancel();
        }

        let ctx = JobContext::new(shared.queue.clone());
        let span = info_span!("job", job_id = %id, kind);
        let handle = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            run_lifecycle(job.as_mut(), &ctx)
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %id, kind, error = %e, "Job panicked");
                JobOutcome::Failed(format!("job panicked: {}", e))
            }
        };
        *shared.current.lock() = None;

        shared.counters.record(&outcome);
        let _ = shared.event_tx.send(JobEvent::Finished { id, kind, outcome });
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            // Worker finishes in the background under the configured policy.
            self.shared.stop.cancel();
        }
    }
}

/// Run one job's callbacks under its lock.
fn run_lifecycle(job: &mut dyn Job, ctx: &JobContext) -> JobOutcome {
    let lock = job.header().lock().clone();
    let _guard = lock.lock();

    let outcome = if job.header().is_cancelled() {
        debug!("Job cancelled before start");
        JobOutcome::Skipped
    } else if !job.can_execute(ctx.now()) {
        debug!("Job not runnable, skipping");
        JobOutcome::Skipped
    } else {
        let result = panic::catch_unwind(AssertUnwindSafe(|| job.execute(ctx)))
            .unwrap_or_else(|payload| {
                Err(RelayError::JobPanicked(panic_message(payload.as_ref())))
            });
        match result {
            Ok(()) => JobOutcome::Completed,
            Err(e) => {
                warn!(error = %e, "Job failed");
                job.on_error(ctx, &e);
                JobOutcome::Failed(e.to_string())
            }
        }
    };

    job.on_completed(ctx, &outcome);
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
