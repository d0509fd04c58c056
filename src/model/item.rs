//! Export items and their lifecycle

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::export_config::{ExportConfig, Selector};

const MAX_TITLE_LEN: usize = 64;

/// Opaque unique identifier of an export item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Requester identity, compared only for subscriber membership
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequesterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Export status
///
/// Allowed transitions:
/// `Pending -> Running -> {Done, Error}` and `Running -> Canceling -> Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Canceling,
    Done,
    Error,
    Canceled,
}

impl Status {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Error | Status::Canceled)
    }

    /// Whether `next` is a permitted successor of this status
    pub fn can_advance_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Running)
                | (Status::Running, Status::Done)
                | (Status::Running, Status::Error)
                | (Status::Running, Status::Canceling)
                | (Status::Canceling, Status::Canceled)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Canceling => "canceling",
            Status::Done => "done",
            Status::Error => "error",
            Status::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Tracked unit of export work
#[derive(Debug, Clone, Serialize)]
pub struct ExportItem {
    /// Unique identifier
    pub id: ItemId,

    /// Queries to run, in order; emptied once the item is archived
    pub selectors: Vec<Selector>,

    /// Formatting configuration
    pub config: ExportConfig,

    /// Title given by the first requester
    pub title: String,

    /// File name of the artifact inside the export directory
    pub artifact_name: String,

    /// Admission time
    pub created_at: DateTime<Utc>,

    /// Time the item reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Current status
    pub status: Status,

    /// Terminal error message
    pub error: Option<String>,

    /// Rows written to the artifact
    pub rows_written: u64,

    /// Requesters interested in this export; never empty while reachable
    pub subscribers: BTreeSet<RequesterId>,
}

impl ExportItem {
    /// Create a pending item with a single subscriber
    pub fn new(
        selectors: Vec<Selector>,
        config: ExportConfig,
        title: impl Into<String>,
        requester: RequesterId,
        compressed: bool,
    ) -> Self {
        let title = title.into();
        let artifact_name = artifact_name(&title, &config, compressed);
        Self {
            id: ItemId::new(),
            selectors,
            config,
            title,
            artifact_name,
            created_at: Utc::now(),
            finished_at: None,
            status: Status::Pending,
            error: None,
            rows_written: 0,
            subscribers: BTreeSet::from([requester]),
        }
    }

    /// Whether this item describes the same extraction
    pub fn is_same_export(&self, selectors: &[Selector], config: &ExportConfig, title: &str) -> bool {
        self.title == title && self.config == *config && self.selectors == selectors
    }

    pub fn is_subscribed(&self, requester: &RequesterId) -> bool {
        self.subscribers.contains(requester)
    }

    /// Whether `requester` is the only subscriber
    pub fn is_sole_subscriber(&self, requester: &RequesterId) -> bool {
        self.subscribers.len() == 1 && self.is_subscribed(requester)
    }

    /// Move to `next` if the transition is permitted
    ///
    /// Returns `false` and leaves the status untouched otherwise.
    pub fn advance(&mut self, next: Status) -> bool {
        if !self.status.can_advance_to(next) {
            warn!(
                "Refusing status transition {} -> {} for export {}",
                self.status, next, self.id
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Copy kept in the archive: selector payloads are no longer needed
    pub fn minimized(mut self) -> Self {
        self.selectors = Vec::new();
        self
    }

    /// Reference time for retention
    pub fn retained_since(&self) -> DateTime<Utc> {
        self.finished_at.unwrap_or(self.created_at)
    }
}

/// Build `{token}_{sanitized-title}.{ext}` for a new artifact
pub fn artifact_name(title: &str, config: &ExportConfig, compressed: bool) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let ext = config.format.extension();
    if compressed {
        format!("{}_{}.{}.gz", token, sanitize_title(title), ext)
    } else {
        format!("{}_{}.{}", token, sanitize_title(title), ext)
    }
}

/// Reduce a title to a file-name safe fragment
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_TITLE_LEN));
    for c in title.trim().chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
        if out.len() >= MAX_TITLE_LEN {
            break;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExportFormat;

    fn item() -> ExportItem {
        ExportItem::new(
            vec![Selector::new("shop", "orders")],
            ExportConfig::default(),
            "Orders",
            RequesterId::from("alice"),
            true,
        )
    }

    #[test]
    fn test_new_item_is_pending_with_one_subscriber() {
        let item = item();
        assert_eq!(item.status, Status::Pending);
        assert!(item.is_sole_subscriber(&"alice".into()));
        assert!(item.finished_at.is_none());
    }

    #[test]
    fn test_status_graph() {
        use Status::*;
        assert!(Pending.can_advance_to(Running));
        assert!(Running.can_advance_to(Done));
        assert!(Running.can_advance_to(Error));
        assert!(Running.can_advance_to(Canceling));
        assert!(Canceling.can_advance_to(Canceled));

        assert!(!Pending.can_advance_to(Done));
        assert!(!Pending.can_advance_to(Canceling));
        assert!(!Canceling.can_advance_to(Done));
        assert!(!Canceling.can_advance_to(Running));
        assert!(!Done.can_advance_to(Running));
        assert!(!Canceled.can_advance_to(Canceling));
    }

    #[test]
    fn test_advance_sets_finished_at_on_terminal() {
        let mut item = item();
        assert!(item.advance(Status::Running));
        assert!(item.finished_at.is_none());
        assert!(item.advance(Status::Done));
        assert!(item.finished_at.is_some());
        assert!(!item.advance(Status::Running));
        assert_eq!(item.status, Status::Done);
    }

    #[test]
    fn test_minimized_drops_selectors() {
        let item = item().minimized();
        assert!(item.selectors.is_empty());
        assert_eq!(item.title, "Orders");
    }

    #[test]
    fn test_artifact_name_shape() {
        let csv = artifact_name("Q3 report / EU", &ExportConfig::default(), true);
        let (token, rest) = csv.split_once('_').unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "Q3_report_EU.csv.gz");

        let jsonl = artifact_name("x", &ExportConfig::new(ExportFormat::JsonLines), false);
        assert!(jsonl.ends_with("_x.jsonl"));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("  hello world  "), "hello_world");
        assert_eq!(sanitize_title("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_title("***"), "export");
        assert_eq!(sanitize_title(""), "export");
        assert_eq!(sanitize_title(&"a".repeat(200)).len(), MAX_TITLE_LEN);
    }

    #[test]
    fn test_same_export() {
        let item = item();
        let selectors = vec![Selector::new("shop", "orders")];
        assert!(item.is_same_export(&selectors, &ExportConfig::default(), "Orders"));
        assert!(!item.is_same_export(&selectors, &ExportConfig::default(), "Other"));
        assert!(!item.is_same_export(&[], &ExportConfig::default(), "Orders"));
    }
}
