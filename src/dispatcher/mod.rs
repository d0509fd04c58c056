//! Dispatcher
//!
//! Moves pending items from the admission queue onto idle workers. It wakes
//! on a fixed tick and immediately whenever a worker reports a completion.
//! Each completion also triggers the `Finished` notification. The same loop
//! drives the retention sweeper on its own, slower tick.
//!
//! A pass holds the queue lock throughout and takes each worker lock in
//! ordinal order, so an item is always owned by exactly one of the two.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::RetentionSweeper;
use crate::notify::{self, NotificationKind, Notifier};
use crate::queue::AdmissionQueue;
use crate::worker::{Completion, WorkerContext, WorkerPool};

/// Assign queued items to available workers, oldest first
///
/// Returns the number of items handed out.
pub async fn dispatch_pass(
    queue: &AdmissionQueue,
    pool: &WorkerPool,
    context: &Arc<WorkerContext>,
) -> usize {
    let mut queue = queue.lock().await;
    let mut assigned = 0;

    for worker in pool.iter() {
        if queue.is_empty() {
            break;
        }
        let mut slot = worker.lock().await;
        if !slot.is_available() {
            continue;
        }
        let Some(item) = queue.pop_front() else {
            break;
        };
        worker.assign(&mut slot, item);
        drop(slot);

        tokio::spawn(Arc::clone(worker).run(Arc::clone(context)));
        assigned += 1;
    }

    if assigned > 0 {
        debug!("Dispatched {} exports, {} still queued", assigned, queue.len());
    }
    assigned
}

/// Background loop feeding workers and running retention
pub struct Dispatcher {
    queue: Arc<AdmissionQueue>,
    pool: Arc<WorkerPool>,
    context: Arc<WorkerContext>,
    sweeper: Arc<RetentionSweeper>,
    notifier: Arc<dyn Notifier>,
    completions: mpsc::Receiver<Completion>,
    dispatch_interval: Duration,
    sweep_interval: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<AdmissionQueue>,
        pool: Arc<WorkerPool>,
        context: Arc<WorkerContext>,
        sweeper: Arc<RetentionSweeper>,
        notifier: Arc<dyn Notifier>,
        completions: mpsc::Receiver<Completion>,
        dispatch_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            queue,
            pool,
            context,
            sweeper,
            notifier,
            completions,
            dispatch_interval,
            sweep_interval,
        }
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Dispatcher started: {} workers, tick {:?}, sweep every {:?}",
            self.pool.len(),
            self.dispatch_interval,
            self.sweep_interval
        );

        let mut dispatch_tick = tokio::time::interval(self.dispatch_interval);
        dispatch_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval(self.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(completion) = self.completions.recv() => {
                    self.on_completion(completion);
                    dispatch_pass(&self.queue, &self.pool, &self.context).await;
                }
                _ = dispatch_tick.tick() => {
                    dispatch_pass(&self.queue, &self.pool, &self.context).await;
                }
                _ = sweep_tick.tick() => {
                    if sweep.as_ref().is_some_and(|handle| !handle.is_finished()) {
                        debug!("Previous retention sweep still running, skipping");
                        continue;
                    }
                    let sweeper = Arc::clone(&self.sweeper);
                    sweep = Some(tokio::spawn(async move {
                        sweeper.sweep().await;
                    }));
                }
            }
        }

        if let Some(handle) = sweep {
            if let Err(e) = handle.await {
                warn!("Retention sweep ended abnormally: {}", e);
            }
        }
        // Deliver whatever finished while shutting down.
        while let Ok(completion) = self.completions.try_recv() {
            self.on_completion(completion);
        }
        info!("Dispatcher stopped");
    }

    fn on_completion(&self, completion: Completion) {
        debug!(
            "Worker {} reported export {} {}",
            completion.worker, completion.item.id, completion.item.status
        );
        notify::dispatch(
            Arc::clone(&self.notifier),
            NotificationKind::Finished,
            completion.item,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::model::{ExportConfig, RequesterId, Selector, Status};
    use crate::pipeline::ExportCoordinator;
    use crate::testing::{MemorySource, RecordingNotifier, eventually};

    struct Fixture {
        queue: Arc<AdmissionQueue>,
        pool: Arc<WorkerPool>,
        context: Arc<WorkerContext>,
        completions: mpsc::Receiver<Completion>,
        _dir: tempfile::TempDir,
    }

    fn fixture(workers: usize, source: MemorySource) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(workers.max(1));
        let context = Arc::new(WorkerContext {
            coordinator: ExportCoordinator::new(Arc::new(source), 2, false),
            archive: Arc::new(Archive::new()),
            base_dir: dir.path().to_path_buf(),
            shutdown: CancellationToken::new(),
            completions: tx,
        });
        Fixture {
            queue: Arc::new(AdmissionQueue::new(10)),
            pool: Arc::new(WorkerPool::new(workers)),
            context,
            completions: rx,
            _dir: dir,
        }
    }

    async fn enqueue(queue: &AdmissionQueue, collection: &str) {
        queue
            .lock()
            .await
            .enqueue(
                vec![Selector::new("db", collection)],
                ExportConfig::default(),
                collection,
                RequesterId::from("alice"),
                false,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_pass_fills_idle_workers_in_order() {
        let (source, gate) = MemorySource::new().gated();
        let f = fixture(2, source);
        for c in ["a", "b", "c"] {
            enqueue(&f.queue, c).await;
        }

        assert_eq!(dispatch_pass(&f.queue, &f.pool, &f.context).await, 2);
        assert_eq!(f.queue.len().await, 1);
        for (ordinal, title) in [(0, "a"), (1, "b")] {
            let slot = f.pool.get(ordinal).unwrap().lock().await;
            let item = slot.current().unwrap();
            assert_eq!(item.title, title);
            assert_eq!(item.status, Status::Running);
        }

        // Both workers busy: nothing moves.
        assert_eq!(dispatch_pass(&f.queue, &f.pool, &f.context).await, 0);
        gate.add_permits(10);
    }

    #[tokio::test]
    async fn test_pass_on_empty_queue() {
        let f = fixture(1, MemorySource::new());
        assert_eq!(dispatch_pass(&f.queue, &f.pool, &f.context).await, 0);
        assert!(f.pool.get(0).unwrap().lock().await.is_available());
    }

    #[tokio::test]
    async fn test_loop_refills_on_completion_and_notifies() {
        let f = fixture(1, MemorySource::new().with_rows("db.a", 1).with_rows("db.b", 1));
        enqueue(&f.queue, "a").await;
        enqueue(&f.queue, "b").await;

        let notifier = Arc::new(RecordingNotifier::default());
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&f.context.archive),
            Arc::clone(&f.pool),
            f.context.base_dir.clone(),
            chrono::Duration::hours(24),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&f.queue),
            Arc::clone(&f.pool),
            Arc::clone(&f.context),
            sweeper,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            f.completions,
            // Only the first tick fires; the second item moves on completion.
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(shutdown.clone()));

        let archive = Arc::clone(&f.context.archive);
        assert!(
            eventually(move || {
                let archive = Arc::clone(&archive);
                async move { archive.len().await == 2 }
            })
            .await
        );
        let recorder = Arc::clone(&notifier);
        assert!(
            eventually(move || {
                let recorder = Arc::clone(&recorder);
                async move {
                    let events = recorder.events.lock().await;
                    events.len() == 2 && events.iter().all(|e| e.kind == NotificationKind::Finished)
                }
            })
            .await
        );

        shutdown.cancel();
        handle.await.unwrap();
    }
}
