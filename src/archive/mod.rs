//! Archive of finished exports
//!
//! Entries are immutable snapshots behind `Arc`; every change replaces the
//! whole value, so readers never observe a half-updated item. Entries stay
//! until their subscribers leave or the retention sweeper expires them.

pub mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::{ExportItem, ItemId, RequesterId};
use crate::service::Removal;

pub use sweeper::{RetentionSweeper, SweepReport};

/// Finished-item store, keyed by id
#[derive(Debug, Default)]
pub struct Archive {
    entries: RwLock<HashMap<ItemId, Arc<ExportItem>>>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a finished item, dropping its selector payload
    pub async fn insert(&self, item: ExportItem) -> Arc<ExportItem> {
        let snapshot = Arc::new(item.minimized());
        self.entries
            .write()
            .await
            .insert(snapshot.id, Arc::clone(&snapshot));
        debug!("Archived export {} ({})", snapshot.id, snapshot.status);
        snapshot
    }

    pub async fn get(&self, id: ItemId) -> Option<Arc<ExportItem>> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Archived items `requester` subscribes to
    pub async fn for_requester(&self, requester: &RequesterId) -> Vec<Arc<ExportItem>> {
        self.entries
            .read()
            .await
            .values()
            .filter(|item| item.is_subscribed(requester))
            .cloned()
            .collect()
    }

    /// Remove the entry if `requester` is its only subscriber, else unsubscribe
    ///
    /// Returns `None` when the item is not archived or `requester` is not
    /// one of its subscribers.
    pub async fn leave_or_delete(&self, id: ItemId, requester: &RequesterId) -> Option<(Removal, Arc<ExportItem>)> {
        let mut entries = self.entries.write().await;
        let current = entries.get(&id)?;
        if !current.is_subscribed(requester) {
            return None;
        }

        if current.is_sole_subscriber(requester) {
            let removed = entries.remove(&id)?;
            return Some((Removal::Deleted, removed));
        }

        let mut updated = ExportItem::clone(current);
        updated.subscribers.remove(requester);
        let updated = Arc::new(updated);
        entries.insert(id, Arc::clone(&updated));
        Some((Removal::Left, updated))
    }

    /// Remove and return every entry retained since before `cutoff`
    pub async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Vec<Arc<ExportItem>> {
        let mut entries = self.entries.write().await;
        let expired: Vec<ItemId> = entries
            .values()
            .filter(|item| item.retained_since() < cutoff)
            .map(|item| item.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
