//! Spool file erasure job

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Job, JobContext, JobHeader};
use crate::error::RelayResult;
use crate::eraser::SecureEraser;

/// Overwrites and deletes one file. Skipped when the file is already gone.
#[derive(Debug)]
pub struct EraseJob {
    header: JobHeader,
    path: PathBuf,
    eraser: SecureEraser,
}

impl EraseJob {
    pub fn new(path: impl Into<PathBuf>, eraser: SecureEraser) -> Self {
        Self::with_header(JobHeader::new(), path, eraser)
    }

    /// Erase job sharing another job's lock, see [`JobHeader::related`]
    pub fn with_header(header: JobHeader, path: impl Into<PathBuf>, eraser: SecureEraser) -> Self {
        Self {
            header,
            path: path.into(),
            eraser,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Job for EraseJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn kind(&self) -> &'static str {
        "erase"
    }

    fn can_execute(&self, _now: DateTime<Utc>) -> bool {
        self.path.exists()
    }

    fn execute(&mut self, _ctx: &JobContext) -> RelayResult<()> {
        let outcome = self.eraser.destroy(&self.path, self.header.cancel_token())?;
        debug!(path = %self.path.display(), ?outcome, "Erase job done");
        Ok(())
    }

    fn on_discarded(&mut self) {
        // Erase fully even if this job was cancelled
        match self.eraser.destroy(&self.path, &CancellationToken::new()) {
            Ok(outcome) => debug!(path = %self.path.display(), ?outcome, "Discarded erase ran inline"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Discarded erase failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobScheduler, ShutdownPolicy};
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_erase_job_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.upload");
        fs::write(&path, vec![7u8; 20_000]).unwrap();

        let scheduler = JobScheduler::start(ShutdownPolicy::Drain);
        scheduler
            .queue()
            .enqueue(EraseJob::new(&path, SecureEraser::default()))
            .unwrap();

        let stats = scheduler.shutdown().await;
        assert_eq!(stats.completed, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let dir = tempdir().unwrap();
        let scheduler = JobScheduler::start(ShutdownPolicy::Drain);
        scheduler
            .queue()
            .enqueue(EraseJob::new(dir.path().join("absent"), SecureEraser::default()))
            .unwrap();

        let stats = scheduler.shutdown().await;
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 0);
    }
}
