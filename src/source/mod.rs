//! Data sources that exports page through
//!
//! A source answers one page per call and reports the cursor of the next
//! page along with an explicit end-of-data flag. Cursors are row offsets and
//! only ever move forward.

pub mod mongo;

use async_trait::async_trait;
use mongodb::bson::Document;

use crate::error::Result;
use crate::model::Selector;

pub use mongo::MongoDataSource;

/// One page of rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Rows in fetch order
    pub rows: Vec<Document>,
    /// Cursor of the following page
    pub next: u64,
    /// No rows remain after this page
    pub done: bool,
}

/// Paged row source
///
/// The pipeline races every `fetch` against its cancellation token, so an
/// implementation may be dropped mid-call.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch up to `page_size` rows of `selector` starting at `cursor`
    ///
    /// # Arguments
    /// * `selector` - Namespace, filter and projection to read
    /// * `cursor` - Position returned by the previous page, 0 at start
    /// * `page_size` - Maximum rows in the returned page
    ///
    /// # Returns
    /// * `Result<Page>` - Rows, the next cursor and whether the selector is exhausted
    async fn fetch(&self, selector: &Selector, cursor: u64, page_size: u32) -> Result<Page>;
}
