//! Search feed
//!
//! Fire-and-forget forwarding of manifest records to a search indexer.
//! Delivery failures are logged and never reach the pipeline.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::types::ManifestRecord;

const FEED_TIMEOUT: Duration = Duration::from_secs(10);

pub trait SearchFeed: Send + Sync {
    fn publish(&self, record: &ManifestRecord);
}

/// Feed used when no indexer is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeed;

impl SearchFeed for NoopFeed {
    fn publish(&self, record: &ManifestRecord) {
        debug!(id = %record.id, "No search feed configured");
    }
}

/// POSTs each record as JSON to a webhook on a background task
#[derive(Debug, Clone)]
pub struct WebhookFeed {
    client: Client,
    url: String,
}

impl WebhookFeed {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(FEED_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SearchFeed for WebhookFeed {
    fn publish(&self, record: &ManifestRecord) {
        let client = self.client.clone();
        let url = self.url.clone();
        let record = record.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&record).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(id = %record.id, "Published to search feed");
                }
                Ok(resp) => {
                    warn!(id = %record.id, status = %resp.status(), "Search feed rejected record");
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Search feed unreachable");
                }
            }
        });
    }
}
