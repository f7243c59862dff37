use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_rs::parser;
use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::model::FeedEntry;

/// One polled feed endpoint.
#[async_trait]
pub trait FeedSource: Send {
    /// Registry id of the source this endpoint belongs to
    fn source_id(&self) -> &str;

    fn feed_url(&self) -> &str;

    /// Fetches and parses the feed. `Ok(None)` means the server reported no change.
    async fn fetch(&mut self) -> Result<Option<Vec<FeedEntry>>>;
}

/// Builds the shared HTTP client used for feed and article requests.
pub fn build_client(user_agent: &str, timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .context("failed to build reqwest client")
}

/// RSS/Atom endpoint fetched over HTTP with conditional requests.
pub struct HttpFeedSource {
    source_id: String,
    url: String,
    client: Client,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl HttpFeedSource {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            client,
            etag: None,
            last_modified: None,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn feed_url(&self) -> &str {
        &self.url
    }

    async fn fetch(&mut self) -> Result<Option<Vec<FeedEntry>>> {
        let mut request = self.client.get(&self.url);
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(modified) = &self.last_modified {
            request = request.header(IF_MODIFIED_SINCE, modified);
        }

        let response = request
            .send()
            .await
            .context("network error during feed fetch")?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %self.url, "feed not modified");
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("feed fetch failed with status: {}", status);
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);

        let bytes = response.bytes().await.context("failed to read response body")?;
        let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;

        // Validators are only kept once the body parsed, so a broken body gets re-fetched.
        self.etag = etag.or(self.etag.take());
        self.last_modified = last_modified.or(self.last_modified.take());

        Ok(Some(feed.entries.iter().map(FeedEntry::from).collect()))
    }
}
