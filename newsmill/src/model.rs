use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of a parsed feed, before deduplication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedEntry {
    /// Dedup key: entry id, else link, else title (first non-empty).
    pub fn dedup_key(&self) -> Option<String> {
        [&self.id, &self.link, &self.title]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

impl From<&feed_rs::model::Entry> for FeedEntry {
    fn from(entry: &feed_rs::model::Entry) -> Self {
        Self {
            id: Some(entry.id.clone()).filter(|id| !id.is_empty()),
            title: entry.title.as_ref().map(|t| t.content.clone()),
            link: entry.links.first().map(|l| l.href.clone()),
            summary: entry.summary.as_ref().map(|s| s.content.clone()),
            published_at: entry.published.or(entry.updated),
        }
    }
}

/// A new (not yet seen) feed entry, as delivered by a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub source_id: String,
    pub feed_url: String,
    pub external_id: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_entry: FeedEntry,
}

impl FeedItem {
    /// Builds an item from a raw entry; `None` when the entry has no usable dedup key.
    pub fn from_entry(source_id: &str, feed_url: &str, entry: FeedEntry) -> Option<Self> {
        let external_id = entry.dedup_key()?;
        Some(Self {
            source_id: source_id.to_string(),
            feed_url: feed_url.to_string(),
            external_id,
            title: entry.title.clone().unwrap_or_default(),
            link: entry.link.clone().unwrap_or_default(),
            published_at: entry.published_at,
            raw_entry: entry,
        })
    }

    /// Feed-provided summary, empty when the feed carries none.
    pub fn summary(&self) -> &str {
        self.raw_entry.summary.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Full article body extracted from an item's link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub body_text: String,
    pub image_count: usize,
    pub source_name: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Accumulator of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialDraft {
    pub title: String,
    pub summary: String,
    pub themes: String,
    pub candidate_texts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Filtering,
    Synthesizing,
    Drafting,
    Scoring,
    Rewriting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Filtering => "filtering",
            Stage::Synthesizing => "synthesizing",
            Stage::Drafting => "drafting",
            Stage::Scoring => "scoring",
            Stage::Rewriting => "rewriting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    Fetch,
    NoSummary,
    LowQuality,
    Filtered { reason: String },
    ParseError,
    StageFailure { error: String },
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::Fetch => "fetch",
            DropReason::NoSummary => "no-summary",
            DropReason::LowQuality => "low-quality",
            DropReason::Filtered { .. } => "filtered",
            DropReason::ParseError => "parse-error",
            DropReason::StageFailure { .. } => "stage-failure",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Filtered { reason } => write!(f, "filtered: {}", reason),
            DropReason::StageFailure { error } => write!(f, "stage-failure: {}", error),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Rejected { stage: Stage, reason: DropReason },
    Accepted { draft: MaterialDraft, article: Article },
    /// The run was interrupted by shutdown; nothing is stored or reported as dropped.
    Cancelled { stage: Stage },
}

impl PipelineOutcome {
    pub fn rejected(stage: Stage, reason: DropReason) -> Self {
        PipelineOutcome::Rejected { stage, reason }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, PipelineOutcome::Accepted { .. })
    }
}
