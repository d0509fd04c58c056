//! Subscriber notifications
//!
//! Notifications are fire-and-forget: [`dispatch`] spawns the delivery and
//! only logs failures, so a slow or broken notifier never holds up the
//! dispatcher or the retention sweep.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{ExportItem, RequesterId};

/// Kind of lifecycle event being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// The export reached a terminal status and was archived
    Finished,

    /// The archived export and its artifact were removed after retention
    Deleted,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Finished => f.write_str("finished"),
            NotificationKind::Deleted => f.write_str("deleted"),
        }
    }
}

/// Delivery channel for subscriber notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce `kind` for `item` to every subscriber
    async fn notify(
        &self,
        kind: NotificationKind,
        item: &ExportItem,
        subscribers: &[RequesterId],
    ) -> Result<()>;
}

/// Notifier that records events in the service log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        item: &ExportItem,
        subscribers: &[RequesterId],
    ) -> Result<()> {
        for subscriber in subscribers {
            info!(
                subscriber = %subscriber,
                export = %item.id,
                status = %item.status,
                "Export {} {}: {}",
                item.title,
                kind,
                item.artifact_name
            );
        }
        Ok(())
    }
}

/// Spawn delivery of one notification to all current subscribers
pub fn dispatch(notifier: Arc<dyn Notifier>, kind: NotificationKind, item: Arc<ExportItem>) {
    tokio::spawn(async move {
        let subscribers: Vec<RequesterId> = item.subscribers.iter().cloned().collect();
        if let Err(e) = notifier.notify(kind, &item, &subscribers).await {
            warn!("Failed to notify subscribers of export {} ({}): {}", item.id, kind, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportConfig, Selector};

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let item = ExportItem::new(
            vec![Selector::new("db", "c")],
            ExportConfig::default(),
            "t",
            "alice".into(),
            true,
        );
        let subscribers = vec![RequesterId::from("alice")];
        assert!(
            LogNotifier
                .notify(NotificationKind::Finished, &item, &subscribers)
                .await
                .is_ok()
        );
    }
}
