//! Stress tests for the job queue and scheduler
//!
//! Many producer threads enqueue at once; every job must run exactly once
//! and each producer's jobs must run in the order it enqueued them. Jobs
//! accepted while the scheduler is shutting down must still be accounted for.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relaybox_core::{
    Job, JobContext, JobHeader, JobScheduler, RelayResult, ShutdownPolicy,
};

/// Records (producer, sequence) when executed
struct TagJob {
    header: JobHeader,
    producer: usize,
    seq: usize,
    seen: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl Job for TagJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn kind(&self) -> &'static str {
        "tag"
    }

    fn execute(&mut self, _ctx: &JobContext) -> RelayResult<()> {
        self.seen.lock().push((self.producer, self.seq));
        Ok(())
    }
}

// ============================================================================
// Concurrent Enqueue
// ============================================================================

fn run_producers(producers: usize, per_producer: usize) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let scheduler = JobScheduler::start(ShutdownPolicy::Drain);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let handles: Vec<_> = (0..producers)
            .map(|producer| {
                let queue = scheduler.queue();
                let seen = seen.clone();
                thread::spawn(move || {
                    for seq in 0..per_producer {
                        queue
                            .enqueue(TagJob {
                                header: JobHeader::new(),
                                producer,
                                seq,
                                seen: seen.clone(),
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = scheduler.shutdown().await;
        let elapsed = start.elapsed();
        assert_eq!(stats.completed as usize, producers * per_producer);

        let seen = seen.lock();
        assert_eq!(seen.len(), producers * per_producer);

        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "a job ran twice");

        let mut next: HashMap<usize, usize> = HashMap::new();
        for &(producer, seq) in seen.iter() {
            let expected = next.entry(producer).or_insert(0);
            assert_eq!(seq, *expected, "producer {} out of order", producer);
            *expected += 1;
        }

        println!(
            "{} producers x {} jobs in {:?}",
            producers, per_producer, elapsed
        );
    });
}

#[test]
fn test_concurrent_enqueue_small() {
    run_producers(4, 50);
}

#[test]
fn test_concurrent_enqueue_many_producers() {
    run_producers(16, 200);
}

// ============================================================================
// Enqueue Racing Shutdown
// ============================================================================

/// Producers keep enqueueing while the scheduler stops; every accepted job
/// must end up either run or discarded.
fn run_shutdown_race(policy: ShutdownPolicy) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let scheduler = JobScheduler::start(ShutdownPolicy::Drain);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let queue = scheduler.queue();
                let seen = seen.clone();
                let accepted = accepted.clone();
                thread::spawn(move || {
                    for seq in 0..2_000 {
                        let job = TagJob {
                            header: JobHeader::new(),
                            producer,
                            seq,
                            seen: seen.clone(),
                        };
                        if queue.enqueue(job).is_err() {
                            break;
                        }
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(2)).await;
        let stats = scheduler.shutdown_with(policy).await;
        for handle in handles {
            handle.join().unwrap();
        }

        let accepted = accepted.load(Ordering::SeqCst);
        assert_eq!(stats.completed + stats.skipped + stats.discarded, accepted);
        assert_eq!(stats.failed, 0);
        assert_eq!(seen.lock().len() as u64, stats.completed);
        if policy == ShutdownPolicy::Drain {
            assert_eq!(stats.completed, accepted);
        }
    });
}

#[test]
fn test_enqueue_racing_drain_shutdown_is_not_lost() {
    run_shutdown_race(ShutdownPolicy::Drain);
}

#[test]
fn test_enqueue_racing_discard_shutdown_is_not_lost() {
    run_shutdown_race(ShutdownPolicy::Discard);
}
