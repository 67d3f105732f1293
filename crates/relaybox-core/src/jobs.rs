//! Background jobs
//!
//! A [`Job`] is a unit of relay work (seal an envelope, erase a spool
//! file, ...) run by the [`JobScheduler`]'s single worker. Producers on any
//! thread push jobs onto a shared [`JobQueue`]; jobs can push follow-up jobs
//! through their [`JobContext`] while executing.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──enqueue──▶ Queued ──dequeue──▶ can_execute(now)?
//!                                             │ no / cancelled ──▶ Skipped ─┐
//!                                             │ yes                         │
//!                                             ▼                             │
//!                                          execute ──Err──▶ on_error ──▶ Failed
//!                                             │ Ok                          │
//!                                             ▼                             │
//!                                          Completed ◀─────────────────────┘
//!                                             │
//!                                        on_completed (always)
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::error::{RelayError, RelayResult};

mod erase;
mod queue;
mod scheduler;

pub use erase::EraseJob;
pub use queue::JobQueue;
pub use scheduler::{JobEvent, JobScheduler, SchedulerStats, ShutdownPolicy};

/// Unique identifier for a job
///
/// Uses ULID: 128 bits, time-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new JobId with the current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

/// Mutual-exclusion handle shared by related jobs.
///
/// The worker holds the lock for a job's entire lifecycle, so jobs sharing
/// a lock never overlap even if the scheduler grows more workers.
#[derive(Clone, Default)]
pub struct JobLock(Arc<Mutex<()>>);

impl JobLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }

    /// Whether both handles guard the same lock
    pub fn shares_with(&self, other: &JobLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for JobLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobLock")
            .field(&(Arc::as_ptr(&self.0) as usize))
            .finish()
    }
}

/// Identity, lock and cancellation flag common to every job.
///
/// Everything except the cancellation flag is fixed at construction.
#[derive(Debug, Clone)]
pub struct JobHeader {
    id: JobId,
    lock: JobLock,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
}

impl JobHeader {
    /// Header with a fresh id and its own lock
    pub fn new() -> Self {
        Self::with_lock(JobLock::new())
    }

    /// Header with a fresh id sharing `lock`
    pub fn with_lock(lock: JobLock) -> Self {
        Self {
            id: JobId::new(),
            lock,
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    /// Header for a follow-up job: new id, same lock, own cancellation flag
    pub fn related(&self) -> Self {
        Self::with_lock(self.lock.clone())
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn lock(&self) -> &JobLock {
        &self.lock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Token polled by long-running job bodies
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for JobHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Final state of a dequeued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// `execute` returned `Ok`
    Completed,
    /// `execute` returned an error (or panicked)
    Failed(String),
    /// `can_execute` said no, or the job was cancelled before it started
    Skipped,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed(_))
    }
}

/// What a running job can see of the scheduler.
#[derive(Debug, Clone)]
pub struct JobContext {
    queue: JobQueue,
    now: DateTime<Utc>,
}

impl JobContext {
    pub(crate) fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            now: Utc::now(),
        }
    }

    /// Time the job was dequeued
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Queue for chaining follow-up jobs
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Append a follow-up job behind everything already queued.
    pub fn enqueue<J: Job>(&self, job: J) -> RelayResult<JobId> {
        self.queue.enqueue(job)
    }
}

/// A unit of background work.
///
/// Bodies run synchronously on a blocking worker thread and may do file
/// I/O freely. Errors returned from [`execute`](Job::execute) are routed to
/// [`on_error`](Job::on_error), as is a panic; [`on_completed`](Job::on_completed)
/// always runs afterwards. A job dropped unrun by a discarding shutdown gets
/// [`on_discarded`](Job::on_discarded) instead.
pub trait Job: Send + 'static {
    fn header(&self) -> &JobHeader;

    /// Short name for logs and events
    fn kind(&self) -> &'static str;

    /// Re-checked immediately before running; `false` skips the job.
    fn can_execute(&self, _now: DateTime<Utc>) -> bool {
        true
    }

    fn execute(&mut self, ctx: &JobContext) -> RelayResult<()>;

    fn on_error(&mut self, _ctx: &JobContext, _error: &RelayError) {}

    fn on_completed(&mut self, _ctx: &JobContext, _outcome: &JobOutcome) {}

    /// Release whatever the job holds when it will never run.
    fn on_discarded(&mut self) {}
}
