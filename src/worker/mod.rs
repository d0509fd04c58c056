//! Worker pool
//!
//! A fixed set of workers, each owning at most one export at a time. A
//! worker's slot (availability flag plus current item) sits behind its own
//! lock; the dispatcher assigns into it, the service inspects it, and the
//! worker's task applies the outcome through it.
//!
//! Completion happens in one critical section on the worker lock: the final
//! status is applied, the item moves into the archive, and the worker becomes
//! available again. No observer can see the item in both places or in
//! neither. The dispatcher then gets a [`Completion`] to notify subscribers
//! and refill the worker.
//!
//! Lock order across the crate: queue, then workers by ordinal, then archive.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::model::{ExportItem, ItemId, Status};
use crate::pipeline::{ExportCoordinator, ExportJob, PipelineOutcome, ProgressTracker, sink};

/// Signal sent by a worker after archiving its item
#[derive(Debug, Clone)]
pub struct Completion {
    /// Ordinal of the worker that finished
    pub worker: usize,
    /// Archived snapshot of the finished item
    pub item: Arc<ExportItem>,
}

/// Shared state every worker task needs
pub struct WorkerContext {
    pub coordinator: ExportCoordinator,
    pub archive: Arc<Archive>,
    pub base_dir: PathBuf,
    pub shutdown: CancellationToken,
    /// Sized to the pool: each assignment yields exactly one completion
    pub completions: mpsc::Sender<Completion>,
}

/// Contents of a worker's slot
#[derive(Debug)]
pub struct WorkerSlot {
    available: bool,
    current: Option<ExportItem>,
}

impl WorkerSlot {
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Item being exported, if any
    pub fn current(&self) -> Option<&ExportItem> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut ExportItem> {
        self.current.as_mut()
    }
}

/// One export executor
pub struct Worker {
    ordinal: usize,
    slot: Mutex<WorkerSlot>,
    cancel_tx: mpsc::Sender<()>,
    cancel_rx: Mutex<mpsc::Receiver<()>>,
    progress: ProgressTracker,
}

impl Worker {
    pub fn new(ordinal: usize) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        Self {
            ordinal,
            slot: Mutex::new(WorkerSlot {
                available: true,
                current: None,
            }),
            cancel_tx,
            cancel_rx: Mutex::new(cancel_rx),
            progress: ProgressTracker::new(),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Acquire the worker lock
    pub async fn lock(&self) -> MutexGuard<'_, WorkerSlot> {
        self.slot.lock().await
    }

    /// Rows written so far by the current export
    pub fn rows_written(&self) -> u64 {
        self.progress.processed()
    }

    /// Take ownership of `item` and mark it running
    ///
    /// Must be called with this worker's lock held and the worker available.
    pub fn assign(&self, slot: &mut WorkerSlot, mut item: ExportItem) {
        item.advance(Status::Running);
        self.progress.reset();
        info!("Worker {} took export {} '{}'", self.ordinal, item.id, item.title);
        slot.current = Some(item);
        slot.available = false;
    }

    /// Ask the running export to stop
    ///
    /// Returns `false` if a signal is already pending.
    pub fn request_cancel(&self) -> bool {
        self.cancel_tx.try_send(()).is_ok()
    }

    /// Execute the assigned item and hand it to the archive
    pub async fn run(self: Arc<Self>, context: Arc<WorkerContext>) {
        let job = {
            let slot = self.slot.lock().await;
            match slot.current.as_ref() {
                Some(item) => ExportJob {
                    id: item.id,
                    selectors: item.selectors.clone(),
                    config: item.config.clone(),
                    path: context.base_dir.join(&item.artifact_name),
                },
                None => {
                    warn!("Worker {} started without an assigned export", self.ordinal);
                    return;
                }
            }
        };
        let path = job.path.clone();

        let mut cancel = self.cancel_rx.lock().await;
        let outcome = context
            .coordinator
            .execute(job, &mut cancel, &context.shutdown, &self.progress)
            .await;

        let mut slot = self.slot.lock().await;
        let Some(mut item) = slot.current.take() else {
            warn!("Worker {} lost its export before completion", self.ordinal);
            slot.available = true;
            return;
        };
        self.apply_outcome(&mut item, outcome, &path).await;

        let snapshot = context.archive.insert(item).await;
        // Signals aimed at this export must not reach the next one.
        while cancel.try_recv().is_ok() {}
        slot.available = true;
        drop(slot);
        drop(cancel);

        debug!(
            "Worker {} finished export {} as {}",
            self.ordinal, snapshot.id, snapshot.status
        );
        if context
            .completions
            .send(Completion {
                worker: self.ordinal,
                item: snapshot,
            })
            .await
            .is_err()
        {
            debug!("Dispatcher gone, completion of worker {} dropped", self.ordinal);
        }
    }

    async fn apply_outcome(&self, item: &mut ExportItem, outcome: PipelineOutcome, path: &Path) {
        match outcome {
            PipelineOutcome::Completed { rows, .. } => {
                item.rows_written = rows;
                if item.status == Status::Canceling {
                    // Cancellation arrived after the last page was written.
                    sink::remove_artifact(path).await;
                    item.advance(Status::Canceled);
                } else {
                    item.advance(Status::Done);
                }
            }
            PipelineOutcome::Canceled => {
                item.rows_written = self.progress.processed();
                if item.status == Status::Running {
                    item.advance(Status::Canceling);
                }
                item.advance(Status::Canceled);
            }
            PipelineOutcome::Failed(e) => {
                item.rows_written = self.progress.processed();
                if item.status == Status::Canceling {
                    item.advance(Status::Canceled);
                } else {
                    warn!("Export {} failed: {}", item.id, e);
                    item.error = Some(e.to_string());
                    item.advance(Status::Error);
                }
            }
        }
    }
}

/// Fixed set of workers, addressed by ordinal
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    /// Create `size` idle workers
    pub fn new(size: usize) -> Self {
        Self {
            workers: (0..size).map(|ordinal| Arc::new(Worker::new(ordinal))).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.workers.iter()
    }

    pub fn get(&self, ordinal: usize) -> Option<&Arc<Worker>> {
        self.workers.get(ordinal)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Artifact names of the exports currently held by workers
    pub async fn active_artifacts(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for worker in &self.workers {
            if let Some(item) = worker.lock().await.current() {
                names.insert(item.artifact_name.clone());
            }
        }
        names
    }

    /// Worker currently holding `id`, with its lock held
    pub async fn find(&self, id: ItemId) -> Option<(&Arc<Worker>, MutexGuard<'_, WorkerSlot>)> {
        for worker in &self.workers {
            let slot = worker.lock().await;
            if slot.current().is_some_and(|item| item.id == id) {
                return Some((worker, slot));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportConfig, Selector};
    use crate::testing::MemorySource;

    fn item(collection: &str) -> ExportItem {
        ExportItem::new(
            vec![Selector::new("db", collection)],
            ExportConfig::default(),
            collection,
            "alice".into(),
            false,
        )
    }

    fn context(
        dir: &std::path::Path,
        source: MemorySource,
    ) -> (Arc<WorkerContext>, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel(4);
        let context = WorkerContext {
            coordinator: ExportCoordinator::new(Arc::new(source), 2, false),
            archive: Arc::new(Archive::new()),
            base_dir: dir.to_path_buf(),
            shutdown: CancellationToken::new(),
            completions: tx,
        };
        (Arc::new(context), rx)
    }

    #[tokio::test]
    async fn test_assign_marks_running() {
        let worker = Worker::new(0);
        let mut slot = worker.lock().await;
        assert!(slot.is_available());
        worker.assign(&mut slot, item("a"));
        assert!(!slot.is_available());
        assert_eq!(slot.current().unwrap().status, Status::Running);
    }

    #[tokio::test]
    async fn test_run_archives_and_signals() {
        let dir = tempfile::tempdir().unwrap();
        let (context, mut completions) = context(dir.path(), MemorySource::new().with_rows("db.a", 3));
        let worker = Arc::new(Worker::new(1));
        let item = item("a");
        let id = item.id;
        let name = item.artifact_name.clone();
        worker.assign(&mut *worker.lock().await, item);

        Arc::clone(&worker).run(Arc::clone(&context)).await;

        let completion = completions.recv().await.unwrap();
        assert_eq!(completion.worker, 1);
        assert_eq!(completion.item.id, id);
        assert_eq!(completion.item.status, Status::Done);
        assert_eq!(completion.item.rows_written, 3);
        assert!(completion.item.finished_at.is_some());

        let slot = worker.lock().await;
        assert!(slot.is_available());
        assert!(slot.current().is_none());
        assert!(context.archive.get(id).await.is_some());
        assert!(dir.path().join(name).exists());
    }

    #[tokio::test]
    async fn test_failure_archives_error() {
        let dir = tempfile::tempdir().unwrap();
        let (context, mut completions) = context(dir.path(), MemorySource::new().failing("db.a"));
        let worker = Arc::new(Worker::new(0));
        worker.assign(&mut *worker.lock().await, item("a"));

        Arc::clone(&worker).run(context).await;

        let completion = completions.recv().await.unwrap();
        assert_eq!(completion.item.status, Status::Error);
        assert!(completion.item.error.as_deref().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_canceling_item_finishes_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let (source, gate) = MemorySource::new().with_rows("db.a", 3).gated();
        let (context, mut completions) = context(dir.path(), source);
        let worker = Arc::new(Worker::new(0));
        let item = item("a");
        let name = item.artifact_name.clone();
        worker.assign(&mut *worker.lock().await, item);

        {
            let mut slot = worker.lock().await;
            slot.current_mut().unwrap().advance(Status::Canceling);
            assert!(worker.request_cancel());
        }
        gate.add_permits(10);

        Arc::clone(&worker).run(context).await;

        let completion = completions.recv().await.unwrap();
        assert_eq!(completion.item.status, Status::Canceled);
        assert!(!dir.path().join(name).exists());
        // The pending signal was drained with the export.
        assert!(worker.request_cancel());
    }

    #[tokio::test]
    async fn test_full_completion_channel_does_not_hold_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut completions) = mpsc::channel(1);
        let context = Arc::new(WorkerContext {
            coordinator: ExportCoordinator::new(Arc::new(MemorySource::new().with_rows("db.a", 1)), 2, false),
            archive: Arc::new(Archive::new()),
            base_dir: dir.path().to_path_buf(),
            shutdown: CancellationToken::new(),
            completions: tx.clone(),
        });
        let earlier = Arc::new(item("earlier"));
        tx.send(Completion {
            worker: 9,
            item: Arc::clone(&earlier),
        })
        .await
        .unwrap();

        let worker = Arc::new(Worker::new(0));
        let item = item("a");
        let id = item.id;
        worker.assign(&mut *worker.lock().await, item);
        let task = tokio::spawn(Arc::clone(&worker).run(Arc::clone(&context)));

        // The item is archived and the worker freed while the send waits.
        let archive = Arc::clone(&context.archive);
        assert!(
            crate::testing::eventually(move || {
                let archive = Arc::clone(&archive);
                async move { archive.get(id).await.is_some() }
            })
            .await
        );
        assert!(worker.lock().await.is_available());
        assert!(!task.is_finished());

        assert_eq!(completions.recv().await.unwrap().worker, 9);
        assert_eq!(completions.recv().await.unwrap().item.id, id);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_find() {
        let pool = WorkerPool::new(3);
        let item = item("a");
        let id = item.id;
        {
            let worker = pool.get(2).unwrap();
            worker.assign(&mut *worker.lock().await, item);
        }
        let (worker, slot) = pool.find(id).await.unwrap();
        assert_eq!(worker.ordinal(), 2);
        assert_eq!(slot.current().unwrap().id, id);
        drop(slot);
        assert!(pool.find(ItemId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_active_artifacts() {
        let pool = WorkerPool::new(2);
        assert!(pool.active_artifacts().await.is_empty());
        let item = item("a");
        let name = item.artifact_name.clone();
        let worker = pool.get(1).unwrap();
        worker.assign(&mut *worker.lock().await, item);
        assert_eq!(pool.active_artifacts().await, HashSet::from([name]));
    }
}
