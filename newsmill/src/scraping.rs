use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::io::Cursor;
use tracing::{info, warn};

use crate::model::{Article, FeedItem};

/// Extracts the full article behind a feed item.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    /// `Ok(None)` when the page holds no extractable article.
    async fn fetch(&self, item: &FeedItem) -> Result<Option<Article>>;
}

/// Generic extractor: readability for the main content, html2text for plain text.
pub struct ReadabilityFetcher {
    client: Client,
    source_name: String,
}

impl ReadabilityFetcher {
    pub fn new(client: Client, source_name: impl Into<String>) -> Self {
        Self {
            client,
            source_name: source_name.into(),
        }
    }
}

#[async_trait]
impl ArticleFetcher for ReadabilityFetcher {
    async fn fetch(&self, item: &FeedItem) -> Result<Option<Article>> {
        let url = item.link.as_str();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to fetch article page")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
        }

        // Readability requires a Reader, so we fetch bytes
        let bytes = response.bytes().await.context("failed to read response body")?;
        let url_obj = url::Url::parse(url).context("failed to parse article URL")?;
        let mut reader = Cursor::new(bytes);

        let product = match readability::extractor::extract(&mut reader, &url_obj) {
            Ok(product) => product,
            Err(e) => {
                warn!("scraping: readability failed for {}: {}", url, e);
                return Ok(None);
            }
        };

        let image_count = count_images(&product.content)?;
        let body_text = match html2text::from_read(product.content.as_bytes(), 80) {
            Ok(text) => text,
            Err(e) => {
                warn!("scraping: failed to convert extracted HTML to text: {}", e);
                product.text
            }
        };
        info!("scraping: extracted {} chars, {} images from {}", body_text.len(), image_count, url);

        let title = if product.title.trim().is_empty() {
            item.title.clone()
        } else {
            product.title
        };

        Ok(Some(Article {
            title,
            body_text: body_text.trim().to_string(),
            image_count,
            source_name: self.source_name.clone(),
            link: item.link.clone(),
            published_at: item.published_at,
        }))
    }
}

fn count_images(html: &str) -> Result<usize> {
    let selector =
        Selector::parse("img").map_err(|e| anyhow::anyhow!("invalid image selector: {:?}", e))?;
    Ok(Html::parse_fragment(html).select(&selector).count())
}

/// Content-quality predicate applied before any model call.
#[derive(Debug, Clone)]
pub struct ArticleFilter {
    pub min_text_length: usize,
    pub max_image_to_text_ratio: f64,
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            min_text_length: 400,
            max_image_to_text_ratio: 1.0 / 400.0,
        }
    }
}

impl From<&common::FilterConfig> for ArticleFilter {
    fn from(cfg: &common::FilterConfig) -> Self {
        Self {
            min_text_length: cfg.min_text_length,
            max_image_to_text_ratio: cfg.max_image_to_text_ratio,
        }
    }
}

impl ArticleFilter {
    pub fn is_quality_content(&self, article: &Article) -> bool {
        if article.title.trim().is_empty() || article.body_text.is_empty() {
            return false;
        }
        // Lengths are counted in characters, not bytes.
        let length = article.body_text.chars().count();
        if length < self.min_text_length {
            return false;
        }
        let ratio = article.image_count as f64 / length as f64;
        ratio <= self.max_image_to_text_ratio
    }
}
