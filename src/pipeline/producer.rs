//! Producer side of the export pipeline
//!
//! Pages through every selector in order, pushing pages into a bounded
//! channel. Selectors are never interleaved. Cancellation is checked at each
//! page boundary: while fetching and while waiting for channel capacity.

use std::sync::Arc;

use mongodb::bson::Document;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::model::Selector;
use crate::source::DataSource;

/// Message from producer to consumer
pub type PageMessage = Result<Vec<Document>, ExecutionError>;

/// What to produce
#[derive(Debug, Clone)]
pub struct ProducerPlan {
    pub selectors: Vec<Selector>,
    pub page_size: u32,
    pub row_limit: Option<u64>,
}

/// Spawn the producer task
///
/// The channel closes when the task ends, which the consumer reads as
/// end-of-data unless an error message was sent first.
pub fn spawn(
    source: Arc<dyn DataSource>,
    plan: ProducerPlan,
    tx: mpsc::Sender<PageMessage>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = produce(source.as_ref(), &plan, &tx, &token).await {
            // A closed channel means the consumer is gone; nobody to report to.
            if tx.send(Err(e)).await.is_err() {
                debug!("Producer error dropped, consumer already stopped");
            }
        }
    })
}

async fn produce(
    source: &dyn DataSource,
    plan: &ProducerPlan,
    tx: &mpsc::Sender<PageMessage>,
    token: &CancellationToken,
) -> Result<(), ExecutionError> {
    let mut remaining = plan.row_limit;

    for selector in &plan.selectors {
        let mut cursor = 0u64;
        loop {
            if remaining == Some(0) {
                debug!("Row limit reached, stopping producer");
                return Ok(());
            }

            let page = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                page = source.fetch(selector, cursor, plan.page_size) => {
                    page.map_err(|e| ExecutionError::DataSource(e.to_string()))?
                }
            };

            if page.next < cursor || (page.next == cursor && !page.done) {
                warn!(
                    "Data source cursor for {} did not advance ({} -> {})",
                    selector.namespace(),
                    cursor,
                    page.next
                );
                return Err(ExecutionError::DataSource(format!(
                    "cursor for {} did not advance past {}",
                    selector.namespace(),
                    cursor
                )));
            }

            let mut rows = page.rows;
            if let Some(left) = remaining.as_mut() {
                if rows.len() as u64 > *left {
                    rows.truncate(*left as usize);
                }
                *left -= rows.len() as u64;
            }

            if !rows.is_empty() {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    sent = tx.send(Ok(rows)) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }

            if page.done {
                debug!("Selector {} exhausted at offset {}", selector.namespace(), page.next);
                break;
            }
            cursor = page.next;
        }
    }
    Ok(())
}
