//! MongoDB-backed data source
//!
//! Pages with `skip`/`limit` over a stable sort. Without an explicit sort the
//! query is ordered by `_id` so that consecutive pages neither repeat nor
//! skip documents.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::Client;
use tracing::{debug, info};

use super::{DataSource, Page};
use crate::config::SourceConfig;
use crate::error::Result;
use crate::model::Selector;

/// Data source reading from a MongoDB deployment
#[derive(Debug, Clone)]
pub struct MongoDataSource {
    client: Client,
}

impl MongoDataSource {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from configuration
    ///
    /// The driver connects lazily; the first fetch surfaces connection errors.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some(config.app_name.clone());
        let client = Client::with_options(options)?;
        info!("MongoDB data source configured for {}", redact_uri(&config.uri));
        Ok(Self { client })
    }
}

#[async_trait]
impl DataSource for MongoDataSource {
    async fn fetch(&self, selector: &Selector, cursor: u64, page_size: u32) -> Result<Page> {
        let collection = self
            .client
            .database(&selector.database)
            .collection::<Document>(&selector.collection);
        let sort = selector.sort.clone().unwrap_or_else(|| doc! { "_id": 1 });

        let results = collection
            .find(selector.filter.clone())
            .sort(sort)
            .skip(cursor)
            .limit(i64::from(page_size))
            .batch_size(page_size)
            .await?;
        let rows: Vec<Document> = results.try_collect().await?;

        debug!(
            "Fetched {} rows from {} at offset {}",
            rows.len(),
            selector.namespace(),
            cursor
        );

        let done = rows.len() < page_size as usize;
        Ok(Page {
            next: cursor + rows.len() as u64,
            rows,
            done,
        })
    }
}

/// Hide credentials in a connection string before logging it
fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &uri[..scheme_end], &uri[at..])
        }
        _ => uri.to_string(),
    }
}
