//! JSON line protocol
//!
//! One command per input line, tagged by `op`:
//!
//! ```text
//! {"op":"enqueue","requester":"alice","title":"Orders","selectors":[{"database":"shop","collection":"orders"}]}
//! {"op":"list","requester":"alice"}
//! {"op":"delete","requester":"alice","id":"<uuid>"}
//! ```
//!
//! Every command yields exactly one reply line, `{"ok":true,...}` on success
//! and `{"ok":false,"error":"..."}` otherwise.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{ExportConfig, ExportItem, ItemId, RequesterId, Selector};
use crate::queue::Admission;
use crate::service::{ExportService, Removal};

/// Request read from stdin
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Request an export
    Enqueue {
        requester: RequesterId,
        title: String,
        selectors: Vec<Selector>,
        #[serde(default)]
        config: ExportConfig,
    },

    /// List the requester's exports
    List { requester: RequesterId },

    /// Delete or leave an export
    Delete { requester: RequesterId, id: ItemId },
}

/// Payload of a successful reply
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBody {
    Admission(Admission),
    Items(Vec<ExportItem>),
    Removal(Removal),
}

/// Reply written to stdout
#[derive(Debug, Serialize)]
pub struct Reply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    body: Option<ReplyBody>,
}

impl Reply {
    pub fn success(body: ReplyBody) -> Self {
        Self {
            ok: true,
            error: None,
            body: Some(body),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            body: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Serialize as a single line
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse and execute one input line
pub async fn handle_line(service: &ExportService, line: &str) -> Reply {
    let command = match serde_json::from_str::<Command>(line) {
        Ok(command) => command,
        Err(e) => return Reply::failure(format!("invalid command: {}", e)),
    };
    execute(service, command).await
}

/// Execute a parsed command against the service
pub async fn execute(service: &ExportService, command: Command) -> Reply {
    match command {
        Command::Enqueue {
            requester,
            title,
            selectors,
            config,
        } => {
            if selectors.is_empty() {
                return Reply::failure("an export needs at least one selector");
            }
            match service.enqueue(selectors, config, &title, requester).await {
                Ok(admission) => Reply::success(ReplyBody::Admission(admission)),
                Err(e) => Reply::failure(e.to_string()),
            }
        }
        Command::List { requester } => {
            Reply::success(ReplyBody::Items(service.items_for(&requester).await))
        }
        Command::Delete { requester, id } => Reply::success(ReplyBody::Removal(
            service.delete_or_leave(id, &requester).await,
        )),
    }
}
