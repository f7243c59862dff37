use anyhow::{bail, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ingestion::{FeedSource, HttpFeedSource};
use crate::scraping::{ArticleFetcher, ReadabilityFetcher};

/// A configured source: its feed URLs and the parser for its article pages.
pub struct RegisteredSource {
    pub id: String,
    pub name: String,
    pub urls: Vec<String>,
    fetcher: Arc<dyn ArticleFetcher>,
}

/// Source id → feed URLs and article parser, built once from `[[sources]]`.
pub struct SourceRegistry {
    client: Client,
    sources: Vec<RegisteredSource>,
    by_id: HashMap<String, usize>,
}

impl SourceRegistry {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            sources: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn from_config(configs: &[common::SourceConfig], client: Client) -> Result<Self> {
        let mut registry = Self::new(client.clone());
        for cfg in configs {
            let name = cfg.name.clone().unwrap_or_else(|| cfg.id.clone());
            let fetcher: Arc<dyn ArticleFetcher> = match cfg.parser.as_str() {
                "readability" => Arc::new(ReadabilityFetcher::new(client.clone(), name.clone())),
                other => bail!("source '{}': unknown parser '{}'", cfg.id, other),
            };
            registry.register(&cfg.id, name, cfg.urls.clone(), fetcher)?;
        }
        info!(sources = registry.len(), feeds = registry.feed_count(), "source registry loaded");
        Ok(registry)
    }

    /// Adds a source. Ids must be unique.
    pub fn register(
        &mut self,
        id: &str,
        name: impl Into<String>,
        urls: Vec<String>,
        fetcher: Arc<dyn ArticleFetcher>,
    ) -> Result<()> {
        if self.by_id.contains_key(id) {
            bail!("duplicate source id '{}'", id);
        }
        if urls.is_empty() {
            warn!(source = id, "source has no feed URLs");
        }
        self.by_id.insert(id.to_string(), self.sources.len());
        self.sources.push(RegisteredSource {
            id: id.to_string(),
            name: name.into(),
            urls,
            fetcher,
        });
        Ok(())
    }

    pub fn fetcher(&self, source_id: &str) -> Option<Arc<dyn ArticleFetcher>> {
        self.by_id
            .get(source_id)
            .map(|&i| self.sources[i].fetcher.clone())
    }

    /// Fresh feed endpoints, one per configured URL, with empty conditional-GET state.
    pub fn feed_sources(&self) -> Vec<Box<dyn FeedSource>> {
        self.sources
            .iter()
            .flat_map(|source| {
                source.urls.iter().map(move |url| {
                    Box::new(HttpFeedSource::new(&source.id, url, self.client.clone()))
                        as Box<dyn FeedSource>
                })
            })
            .collect()
    }

    pub fn sources(&self) -> &[RegisteredSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn feed_count(&self) -> usize {
        self.sources.iter().map(|s| s.urls.len()).sum()
    }
}
