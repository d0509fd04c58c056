//! Streaming export pipeline
//!
//! One pipeline runs per active export, inside the worker that owns it:
//!
//! 1. **Producer** (`producer`): a task paging the data source, selector by
//!    selector, into a bounded channel
//! 2. **Consumer** (`ExportCoordinator::execute`): runs on the worker's task,
//!    formats each page, pushes it through the artifact sink
//! 3. **Sink** (`sink`): optional gzip over a file that must not already exist
//!
//! The consumer watches the worker's cancel signal next to the page channel.
//! On cancellation it stops reading and cancels the producer's token; on
//! exhaustion the channel closes and the consumer finishes normally. Every
//! outcome other than success removes the partial artifact. A pre-existing
//! artifact is never touched.

pub mod formatters;
pub mod producer;
pub mod progress;
pub mod sink;
pub mod value;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::model::{ExportConfig, ItemId, Selector};
use crate::source::DataSource;

pub use formatters::RowFormatter;
pub use producer::{PageMessage, ProducerPlan};
pub use progress::ProgressTracker;
pub use sink::ArtifactSink;

/// Result of running one export
#[derive(Debug)]
pub enum PipelineOutcome {
    /// All pages were written and the artifact closed
    Completed { rows: u64, bytes: u64 },

    /// Stopped by the cancel signal or shutdown; artifact removed
    Canceled,

    /// Stopped by an error; artifact removed unless it pre-existed
    Failed(ExecutionError),
}

/// Everything the pipeline needs to know about one export
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: ItemId,
    pub selectors: Vec<Selector>,
    pub config: ExportConfig,
    pub path: PathBuf,
}

/// Runs export jobs against a data source
pub struct ExportCoordinator {
    /// Source of pages
    source: Arc<dyn DataSource>,
    /// Depth of the producer/consumer channel
    channel_depth: usize,
    /// Whether artifacts are gzip-compressed
    compress: bool,
}

impl ExportCoordinator {
    pub fn new(source: Arc<dyn DataSource>, channel_depth: usize, compress: bool) -> Self {
        Self {
            source,
            channel_depth: channel_depth.max(1),
            compress,
        }
    }

    /// Run `job` to completion, cancellation or failure
    ///
    /// `cancel` is the worker's cancel signal; `shutdown` aborts every
    /// in-flight export at once. Both end the export as canceled.
    ///
    /// # Arguments
    /// * `job` - Selectors, output settings and artifact path
    /// * `cancel` - Receiver of the worker's cancel signal
    /// * `shutdown` - Service-wide shutdown token
    /// * `progress` - Counter updated after every written page
    ///
    /// # Returns
    /// * `PipelineOutcome` - Completed with counts, canceled, or failed
    pub async fn execute(
        &self,
        job: ExportJob,
        cancel: &mut mpsc::Receiver<()>,
        shutdown: &CancellationToken,
        progress: &ProgressTracker,
    ) -> PipelineOutcome {
        let start_time = Instant::now();
        info!("Starting export {} into {}", job.id, job.path.display());

        let mut sink = match ArtifactSink::create(&job.path, self.compress).await {
            Ok(sink) => sink,
            Err(e) => return PipelineOutcome::Failed(e),
        };
        let mut formatter = formatters::for_config(&job.config);

        let token = shutdown.child_token();
        let (tx, mut rx) = mpsc::channel::<PageMessage>(self.channel_depth);
        let plan = ProducerPlan {
            selectors: job.selectors,
            page_size: job.config.page_size(),
            row_limit: job.config.row_limit,
        };
        let producer = producer::spawn(Arc::clone(&self.source), plan, tx, token.clone());

        let mut rows = 0u64;
        let mut pages = 0u32;
        let mut failure: Option<ExecutionError> = None;
        let mut canceled = false;

        loop {
            tokio::select! {
                biased;
                Some(()) = cancel.recv() => {
                    info!("Export {} cancellation requested", job.id);
                    canceled = true;
                    break;
                }
                _ = token.cancelled() => {
                    info!("Export {} interrupted by shutdown", job.id);
                    canceled = true;
                    break;
                }
                message = rx.recv() => match message {
                    Some(Ok(page)) => {
                        let count = page.len() as u64;
                        let written = match formatter.encode(&page) {
                            Ok(bytes) => sink.write(&bytes).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = written {
                            failure = Some(e);
                            break;
                        }
                        rows += count;
                        pages += 1;
                        progress.add(count);
                        debug!("Export {} wrote page {} ({} rows)", job.id, pages, count);
                        if pages % 10 == 0 {
                            info!(
                                "Export {} progress: {} rows ({} pages, {:.0} rows/s)",
                                job.id,
                                rows,
                                pages,
                                progress.rate()
                            );
                        }
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    None => break,
                },
            }
        }

        token.cancel();
        drop(rx);
        if let Err(e) = producer.await {
            error!("Producer task for export {} ended abnormally: {}", job.id, e);
        }

        if canceled {
            sink.abort().await;
            return PipelineOutcome::Canceled;
        }
        if let Some(e) = failure {
            warn!("Export {} failed: {}", job.id, e);
            sink.abort().await;
            return PipelineOutcome::Failed(e);
        }

        if pages == 0 {
            let header = formatter.empty();
            if let Err(e) = sink.write(&header).await {
                sink.abort().await;
                return PipelineOutcome::Failed(e);
            }
        }

        let path = sink.path().to_path_buf();
        match sink.finish().await {
            Ok(bytes) => {
                info!(
                    "Export {} completed: {} rows, {} bytes, {} ms",
                    job.id,
                    rows,
                    bytes,
                    start_time.elapsed().as_millis()
                );
                PipelineOutcome::Completed { rows, bytes }
            }
            Err(e) => {
                sink::remove_artifact(&path).await;
                PipelineOutcome::Failed(e)
            }
        }
    }
}
