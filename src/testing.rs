//! In-memory collaborators for tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use tokio::sync::{Mutex, Semaphore};

use crate::error::{ExportdError, Result};
use crate::model::{ExportItem, ItemId, RequesterId, Selector, Status};
use crate::notify::{NotificationKind, Notifier};
use crate::source::{DataSource, Page};

/// Data source serving fixed documents per namespace
#[derive(Default)]
pub struct MemorySource {
    collections: HashMap<String, Vec<Document>>,
    fail_namespace: Option<String>,
    gate: Option<Arc<Semaphore>>,
    pub fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` documents `{ n: i }` under `db.collection`
    pub fn with_rows(mut self, namespace: &str, count: i32) -> Self {
        let docs = (0..count).map(|n| doc! { "n": n }).collect();
        self.collections.insert(namespace.to_string(), docs);
        self
    }

    /// Fail every fetch against `namespace`
    pub fn failing(mut self, namespace: &str) -> Self {
        self.fail_namespace = Some(namespace.to_string());
        self
    }

    /// Block every fetch until a permit is added to the returned semaphore
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn fetch(&self, selector: &Selector, cursor: u64, page_size: u32) -> Result<Page> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ExportdError::Generic(e.to_string()))?
                .forget();
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let namespace = selector.namespace();
        if self.fail_namespace.as_deref() == Some(namespace.as_str()) {
            return Err(ExportdError::Generic(format!("{} is unavailable", namespace)));
        }

        let docs = self.collections.get(&namespace).map(Vec::as_slice).unwrap_or(&[]);
        let start = (cursor as usize).min(docs.len());
        let end = (start + page_size as usize).min(docs.len());
        Ok(Page {
            rows: docs[start..end].to_vec(),
            next: end as u64,
            done: end == docs.len(),
        })
    }
}

/// Notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub kind: NotificationKind,
    pub id: ItemId,
    pub status: Status,
    pub subscribers: Vec<RequesterId>,
}

/// Notifier remembering every delivery
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<Recorded>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        item: &ExportItem,
        subscribers: &[RequesterId],
    ) -> Result<()> {
        self.events.lock().await.push(Recorded {
            kind,
            id: item.id,
            status: item.status,
            subscribers: subscribers.to_vec(),
        });
        Ok(())
    }
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}
