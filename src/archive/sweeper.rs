//! Retention sweeper
//!
//! Two independent best-effort passes run on every sweep:
//! 1. expire archive entries older than the retention window, removing their
//!    artifacts and notifying subscribers;
//! 2. scan the export directory and remove every file older than the window,
//!    whether or not any bookkeeping still refers to it. Artifacts of exports
//!    still held by a worker are skipped; their mtime only moves on flush.
//!
//! Failures are logged and counted; the sweep always runs to the end.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::Archive;
use crate::notify::{self, NotificationKind, Notifier};
use crate::worker::WorkerPool;

/// Counters of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Archive entries expired
    pub expired_items: usize,
    /// Files removed from the export directory
    pub removed_files: usize,
    /// Deletions that failed
    pub failures: usize,
}

/// Deletes archive entries and artifacts past the retention window
pub struct RetentionSweeper {
    archive: Arc<Archive>,
    pool: Arc<WorkerPool>,
    base_dir: PathBuf,
    retention: Duration,
    notifier: Arc<dyn Notifier>,
}

impl RetentionSweeper {
    /// Create a sweeper
    ///
    /// # Arguments
    /// * `archive` - Finished exports to expire
    /// * `pool` - Workers whose current artifacts are never removed
    /// * `base_dir` - Directory holding the artifacts
    /// * `retention` - Age past which entries and files are removed
    /// * `notifier` - Receives a `Deleted` notification per expired entry
    pub fn new(
        archive: Arc<Archive>,
        pool: Arc<WorkerPool>,
        base_dir: PathBuf,
        retention: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            archive,
            pool,
            base_dir,
            retention,
            notifier,
        }
    }

    /// Run a sweep against the current time
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Run a sweep as if the clock read `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            debug!("Retention window reaches past the start of time, nothing to sweep");
            return report;
        };

        self.expire_archive(cutoff, &mut report).await;
        self.remove_stale_files(cutoff, &mut report).await;

        if report.expired_items > 0 || report.removed_files > 0 || report.failures > 0 {
            info!(
                "Retention sweep: {} exports expired, {} files removed, {} failures",
                report.expired_items, report.removed_files, report.failures
            );
        } else {
            debug!("Retention sweep found nothing to remove");
        }
        report
    }

    async fn expire_archive(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        for item in self.archive.remove_older_than(cutoff).await {
            report.expired_items += 1;
            let path = self.base_dir.join(&item.artifact_name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.removed_files += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.failures += 1;
                    warn!("Failed to remove artifact {}: {}", path.display(), e);
                }
            }
            notify::dispatch(Arc::clone(&self.notifier), NotificationKind::Deleted, item);
        }
    }

    async fn remove_stale_files(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let active = self.pool.active_artifacts().await;
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                report.failures += 1;
                warn!("Failed to list {}: {}", self.base_dir.display(), e);
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.failures += 1;
                    warn!("Failed to read entry in {}: {}", self.base_dir.display(), e);
                    break;
                }
            };

            if active.contains(entry.file_name().to_string_lossy().as_ref()) {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => match meta.modified() {
                    Ok(time) => DateTime::<Utc>::from(time),
                    Err(e) => {
                        report.failures += 1;
                        warn!("No modification time for {}: {}", path.display(), e);
                        continue;
                    }
                },
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    report.failures += 1;
                    warn!("Failed to stat {}: {}", path.display(), e);
                    continue;
                }
            };

            if modified >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    report.removed_files += 1;
                    debug!("Removed stale file {}", path.display());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.failures += 1;
                    warn!("Failed to remove stale file {}: {}", path.display(), e);
                }
            }
        }
    }
}
