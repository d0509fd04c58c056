//! Admission queue: bounded, ordered, deduplicating FIFO of pending exports
//!
//! A request equal to a queued item (same selectors, configuration and title)
//! never creates a second item; the requester joins the existing subscriber
//! set instead. Only distinct items count against the capacity, and a full
//! queue rejects rather than blocks.
//!
//! Length check, insertion and removal all happen under one lock. Callers that
//! must look at other owners atomically with the queue (enqueue dedup against
//! running workers, dispatch) hold a [`QueueGuard`] for the whole operation.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::AdmissionError;
use crate::model::{ExportConfig, ExportItem, ItemId, RequesterId, Selector};

/// Successful outcome of an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum Admission {
    /// A new pending item was appended to the queue
    Admitted(ItemId),

    /// The requester joined an existing equal item
    Added(ItemId),
}

impl Admission {
    pub fn id(&self) -> ItemId {
        match self {
            Admission::Admitted(id) | Admission::Added(id) => *id,
        }
    }
}

/// Add `requester` to an existing item's subscribers
pub fn subscribe(item: &mut ExportItem, requester: RequesterId) -> Result<Admission, AdmissionError> {
    if item.is_subscribed(&requester) {
        return Err(AdmissionError::AlreadySubscribed(item.id));
    }
    debug!("{} joined export {}", requester, item.id);
    item.subscribers.insert(requester);
    Ok(Admission::Added(item.id))
}

/// Bounded deduplicating FIFO
#[derive(Debug)]
pub struct AdmissionQueue {
    items: Mutex<VecDeque<ExportItem>>,
    capacity: usize,
}

impl AdmissionQueue {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire the queue lock
    pub async fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            items: self.items.lock().await,
            capacity: self.capacity,
        }
    }

    /// Number of queued items
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

/// Exclusive access to the queue contents
pub struct QueueGuard<'a> {
    items: MutexGuard<'a, VecDeque<ExportItem>>,
    capacity: usize,
}

impl QueueGuard<'_> {
    /// Merge into an equal queued item or append a new one
    ///
    /// # Arguments
    /// * `selectors` - Data to export, in order
    /// * `config` - Output settings
    /// * `title` - Human-readable name, part of the artifact name
    /// * `requester` - First subscriber of a new item
    /// * `compressed` - Whether the artifact name gets a `.gz` suffix
    ///
    /// # Returns
    /// * `Result<Admission, AdmissionError>` - `Admitted` for a new item,
    ///   `Added` when merged, or the reason the request was refused
    pub fn enqueue(
        &mut self,
        selectors: Vec<Selector>,
        config: ExportConfig,
        title: &str,
        requester: RequesterId,
        compressed: bool,
    ) -> Result<Admission, AdmissionError> {
        if let Some(existing) = self.find_same_mut(&selectors, &config, title) {
            return subscribe(existing, requester);
        }

        if self.items.len() >= self.capacity {
            return Err(AdmissionError::QueueFull {
                capacity: self.capacity,
            });
        }

        let item = ExportItem::new(selectors, config, title, requester, compressed);
        let id = item.id;
        info!(
            "Admitted export {} '{}' ({} queued)",
            id,
            item.title,
            self.items.len() + 1
        );
        self.items.push_back(item);
        Ok(Admission::Admitted(id))
    }

    /// Queued item equal to the given request
    pub fn find_same_mut(
        &mut self,
        selectors: &[Selector],
        config: &ExportConfig,
        title: &str,
    ) -> Option<&mut ExportItem> {
        self.items
            .iter_mut()
            .find(|item| item.is_same_export(selectors, config, title))
    }

    pub fn find_mut(&mut self, id: ItemId) -> Option<&mut ExportItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Remove a queued item regardless of its position
    pub fn remove(&mut self, id: ItemId) -> Option<ExportItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        self.items.remove(index)
    }

    /// Take the oldest item
    pub fn pop_front(&mut self) -> Option<ExportItem> {
        self.items.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
