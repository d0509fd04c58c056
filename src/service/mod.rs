//! Export service
//!
//! Entry point tying the admission queue, worker pool, dispatcher, archive and
//! retention sweeper together. Requesters interact only through
//! [`ExportService::enqueue`], [`ExportService::items_for`] and
//! [`ExportService::delete_or_leave`].
//!
//! Every operation that needs a consistent view across owners takes the queue
//! lock first, then worker locks in ordinal order, then the archive. Items
//! only ever move forward along that order (queue to worker to archive).
//! Completion moves an item to the archive under its worker lock alone, so a
//! listing keeps every worker guard until the archive has been read.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::archive::{Archive, RetentionSweeper, SweepReport};
use crate::config::ExportSettings;
use crate::dispatcher::{self, Dispatcher};
use crate::error::{AdmissionError, ExportdError, Result};
use crate::model::{ExportConfig, ExportItem, ItemId, RequesterId, Selector, Status};
use crate::notify::Notifier;
use crate::pipeline::{ExportCoordinator, sink};
use crate::queue::{self, Admission, AdmissionQueue};
use crate::source::DataSource;
use crate::worker::{Completion, WorkerContext, WorkerPool};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Outcome of a delete-or-leave request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// The requester was the only subscriber; the item is gone
    Deleted,

    /// The requester was unsubscribed; the item stays for the others
    Left,

    /// The requester was the only subscriber of a running export, which is
    /// now being canceled
    CancellationRequested,

    /// No item with that id has the requester as a subscriber
    NotFound,
}

/// Background export subsystem
pub struct ExportService {
    settings: ExportSettings,
    queue: Arc<AdmissionQueue>,
    pool: Arc<WorkerPool>,
    archive: Arc<Archive>,
    context: Arc<WorkerContext>,
    sweeper: Arc<RetentionSweeper>,
    notifier: Arc<dyn Notifier>,
    completions: Mutex<Option<mpsc::Receiver<Completion>>>,
    shutdown: CancellationToken,
}

impl ExportService {
    /// Build the service; nothing runs until [`ExportService::start`]
    pub fn new(settings: ExportSettings, source: Arc<dyn DataSource>, notifier: Arc<dyn Notifier>) -> Self {
        let archive = Arc::new(Archive::new());
        let pool = Arc::new(WorkerPool::new(settings.workers));
        let shutdown = CancellationToken::new();
        let (completions_tx, completions_rx) = mpsc::channel(settings.workers.max(1));

        let context = Arc::new(WorkerContext {
            coordinator: ExportCoordinator::new(source, settings.channel_depth, settings.compress),
            archive: Arc::clone(&archive),
            base_dir: settings.base_dir.clone(),
            shutdown: shutdown.clone(),
            completions: completions_tx,
        });
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&archive),
            Arc::clone(&pool),
            settings.base_dir.clone(),
            settings.retention(),
            Arc::clone(&notifier),
        ));

        Self {
            queue: Arc::new(AdmissionQueue::new(settings.queue_capacity)),
            pool,
            archive,
            context,
            sweeper,
            notifier,
            completions: Mutex::new(Some(completions_rx)),
            shutdown,
            settings,
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Spawn the dispatcher loop
    ///
    /// Fails if the service was already started.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let completions = self
            .completions
            .lock()
            .await
            .take()
            .ok_or_else(|| ExportdError::Generic("export service already started".to_string()))?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.pool),
            Arc::clone(&self.context),
            Arc::clone(&self.sweeper),
            Arc::clone(&self.notifier),
            completions,
            self.settings.dispatch_interval(),
            self.settings.sweep_interval(),
        );
        Ok(tokio::spawn(dispatcher.run(self.shutdown.clone())))
    }

    /// Stop the dispatcher and cancel every running export
    pub fn shutdown(&self) {
        info!("Shutting down export service");
        self.shutdown.cancel();
    }

    /// Token cancelled on shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request an export
    ///
    /// An equal export already queued or running gains `requester` as a
    /// subscriber instead of being admitted twice.
    ///
    /// # Arguments
    /// * `selectors` - Data to export, in order
    /// * `config` - Output settings
    /// * `title` - Human-readable name of the export
    /// * `requester` - Caller to subscribe
    ///
    /// # Returns
    /// * `Result<Admission, AdmissionError>` - New or merged item id, or why it was refused
    pub async fn enqueue(
        &self,
        selectors: Vec<Selector>,
        config: ExportConfig,
        title: &str,
        requester: RequesterId,
    ) -> std::result::Result<Admission, AdmissionError> {
        let mut queue = self.queue.lock().await;

        if queue.find_same_mut(&selectors, &config, title).is_none() {
            for worker in self.pool.iter() {
                let mut slot = worker.lock().await;
                if let Some(item) = slot.current_mut() {
                    if item.status == Status::Running && item.is_same_export(&selectors, &config, title) {
                        return queue::subscribe(item, requester);
                    }
                }
            }
        }

        queue.enqueue(selectors, config, title, requester, self.settings.compress)
    }

    /// Every item `requester` subscribes to, oldest first
    ///
    /// Running items report the rows written so far. The queue and every
    /// worker stay locked until the archive has been read, so a completion
    /// cannot move an item between two of the reads.
    ///
    /// # Arguments
    /// * `requester` - Subscriber whose items are listed
    ///
    /// # Returns
    /// * `Vec<ExportItem>` - Snapshots of queued, running and archived items
    pub async fn items_for(&self, requester: &RequesterId) -> Vec<ExportItem> {
        let queue = self.queue.lock().await;
        let mut items: Vec<ExportItem> = queue
            .iter()
            .filter(|item| item.is_subscribed(requester))
            .cloned()
            .collect();

        let mut slots = Vec::with_capacity(self.pool.len());
        for worker in self.pool.iter() {
            let slot = worker.lock().await;
            if let Some(item) = slot.current().filter(|item| item.is_subscribed(requester)) {
                let mut item = item.clone();
                item.rows_written = worker.rows_written();
                items.push(item);
            }
            slots.push(slot);
        }

        items.extend(
            self.archive
                .for_requester(requester)
                .await
                .into_iter()
                .map(|item| ExportItem::clone(&item)),
        );
        drop(slots);
        drop(queue);

        items.sort_by_key(|item| item.created_at);
        items
    }

    /// Withdraw `requester` from item `id`
    ///
    /// The sole subscriber of a queued or archived item deletes it; the sole
    /// subscriber of a running item cancels it. Anyone else just leaves.
    ///
    /// # Arguments
    /// * `id` - Item to withdraw from
    /// * `requester` - Subscriber withdrawing
    ///
    /// # Returns
    /// * `Removal` - What happened to the item
    pub async fn delete_or_leave(&self, id: ItemId, requester: &RequesterId) -> Removal {
        let mut queue = self.queue.lock().await;

        if let Some(item) = queue.find_mut(id) {
            if !item.is_subscribed(requester) {
                return Removal::NotFound;
            }
            if item.is_sole_subscriber(requester) {
                queue.remove(id);
                info!("Export {} removed from queue by {}", id, requester);
                return Removal::Deleted;
            }
            item.subscribers.remove(requester);
            debug!("{} left queued export {}", requester, id);
            return Removal::Left;
        }

        if let Some((worker, mut slot)) = self.pool.find(id).await {
            let Some(item) = slot.current_mut() else {
                return Removal::NotFound;
            };
            if !item.is_subscribed(requester) || item.status != Status::Running {
                return Removal::NotFound;
            }
            if item.is_sole_subscriber(requester) {
                item.advance(Status::Canceling);
                if !worker.request_cancel() {
                    debug!("Cancel signal already pending for worker {}", worker.ordinal());
                }
                info!("Cancellation of export {} requested by {}", id, requester);
                return Removal::CancellationRequested;
            }
            item.subscribers.remove(requester);
            debug!("{} left running export {}", requester, id);
            return Removal::Left;
        }

        let removed = self.archive.leave_or_delete(id, requester).await;
        drop(queue);

        match removed {
            Some((Removal::Deleted, item)) => {
                sink::remove_artifact(&self.settings.base_dir.join(&item.artifact_name)).await;
                info!("Archived export {} deleted by {}", id, requester);
                Removal::Deleted
            }
            Some((removal, _)) => removal,
            None => Removal::NotFound,
        }
    }

    /// Wait until no worker holds an export
    pub async fn wait_idle(&self) {
        loop {
            let mut busy = false;
            for worker in self.pool.iter() {
                if !worker.lock().await.is_available() {
                    busy = true;
                    break;
                }
            }
            if !busy {
                return;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Run one dispatch pass now
    pub async fn dispatch_once(&self) -> usize {
        dispatcher::dispatch_pass(&self.queue, &self.pool, &self.context).await
    }

    /// Run one retention sweep as if the clock read `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep_at(now).await
    }
}
