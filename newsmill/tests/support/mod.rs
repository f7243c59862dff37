//! Shared stubs for the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use newsmill::ingestion::FeedSource;
use newsmill::llm::prompts::{
    DRAFT_PREAMBLE, FILTER_PREAMBLE, REWRITE_PREAMBLE, SCORE_PREAMBLE, SYNTHESIZE_PREAMBLE,
};
use newsmill::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use newsmill::model::{Article, FeedEntry, FeedItem, MaterialDraft};
use newsmill::scraping::ArticleFetcher;
use newsmill::storage::PersistenceSink;

pub fn entry(id: &str) -> FeedEntry {
    FeedEntry {
        id: Some(id.to_string()),
        title: Some(format!("Story {}", id)),
        link: Some(format!("https://news.test/{}", id)),
        summary: Some(format!("Summary of {}", id)),
        published_at: None,
    }
}

pub fn entries(ids: &[&str]) -> Vec<FeedEntry> {
    ids.iter().map(|id| entry(id)).collect()
}

pub fn item(source_id: &str, id: &str) -> FeedItem {
    FeedItem::from_entry(source_id, "https://feed.test/rss", entry(id)).expect("entry has a key")
}

pub fn ids(items: &[FeedItem]) -> Vec<String> {
    items.iter().map(|i| i.external_id.clone()).collect()
}

/// One scripted response of a [`ScriptedFeed`].
#[derive(Clone)]
pub enum Step {
    Batch(Vec<FeedEntry>),
    NotModified,
    Fail,
}

/// Feed source replaying a script. The last step repeats once the script runs out.
pub struct ScriptedFeed {
    source_id: String,
    url: String,
    steps: VecDeque<Step>,
    last: Step,
    pub fetches: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    pub fn new(source_id: &str, steps: Vec<Step>) -> Self {
        Self {
            source_id: source_id.to_string(),
            url: format!("https://{}.test/rss", source_id),
            steps: steps.into(),
            last: Step::NotModified,
            fetches: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn batches(source_id: &str, batches: Vec<Vec<FeedEntry>>) -> Self {
        Self::new(source_id, batches.into_iter().map(Step::Batch).collect())
    }

    /// Shares a drop counter with other feeds.
    pub fn counting_drops(mut self, dropped: Arc<AtomicUsize>) -> Self {
        self.dropped = dropped;
        self
    }
}

impl Drop for ScriptedFeed {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn feed_url(&self) -> &str {
        &self.url
    }

    async fn fetch(&mut self) -> Result<Option<Vec<FeedEntry>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = match self.steps.pop_front() {
            Some(step) => {
                self.last = step.clone();
                step
            }
            None => self.last.clone(),
        };
        match step {
            Step::Batch(entries) => Ok(Some(entries)),
            Step::NotModified => Ok(None),
            Step::Fail => Err(anyhow!("connection reset")),
        }
    }
}

/// Per-stage call counters of a [`ScriptedProvider`].
#[derive(Default)]
pub struct Calls {
    pub filter: AtomicUsize,
    pub synthesize: AtomicUsize,
    pub draft: AtomicUsize,
    pub score: AtomicUsize,
    pub rewrite: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.filter.load(Ordering::SeqCst)
            + self.synthesize.load(Ordering::SeqCst)
            + self.draft.load(Ordering::SeqCst)
            + self.score.load(Ordering::SeqCst)
            + self.rewrite.load(Ordering::SeqCst)
    }
}

/// Model stub that answers by stage, recognized from the prompt's first line.
pub struct ScriptedProvider {
    pub filter_reply: String,
    pub synthesize_reply: String,
    pub score_reply: String,
    /// Stage name ("draft", "score", ...) whose calls fail with a transport error
    pub fail_stage: Option<&'static str>,
    /// Stage name whose calls never return
    pub block_stage: Option<&'static str>,
    pub calls: Arc<Calls>,
}

impl ScriptedProvider {
    pub fn accepting() -> Self {
        Self {
            filter_reply: r#"{"useful": "yes", "reason": "a human story"}"#.into(),
            synthesize_reply:
                r#"```json
{"title": "Keeping the lights on", "summary": "A night-shift nurse.", "themes": "duty, care"}
```"#
                .into(),
            score_reply: r#"{"is_ok": "yes", "reason": "clear claim"}"#.into(),
            fail_stage: None,
            block_stage: None,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn always_rejecting() -> Self {
        Self {
            score_reply: r#"{"is_ok": "no", "reason": "the claim is vague"}"#.into(),
            ..Self::accepting()
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let prompt = request.prompt.as_str();
        let (stage, counter) = if prompt.starts_with(FILTER_PREAMBLE) {
            ("filter", &self.calls.filter)
        } else if prompt.starts_with(SYNTHESIZE_PREAMBLE) {
            ("synthesize", &self.calls.synthesize)
        } else if prompt.starts_with(DRAFT_PREAMBLE) {
            ("draft", &self.calls.draft)
        } else if prompt.starts_with(SCORE_PREAMBLE) {
            ("score", &self.calls.score)
        } else if prompt.starts_with(REWRITE_PREAMBLE) {
            ("rewrite", &self.calls.rewrite)
        } else {
            return Err(anyhow!("unexpected prompt: {}", prompt));
        };
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_stage == Some(stage) {
            return Err(anyhow!("LLM API error 503: overloaded"));
        }
        if self.block_stage == Some(stage) {
            std::future::pending::<()>().await;
        }

        let content = match stage {
            "filter" => self.filter_reply.clone(),
            "synthesize" => self.synthesize_reply.clone(),
            "score" => self.score_reply.clone(),
            "draft" => format!("Draft paragraph {}.", n),
            _ => format!("Rewritten paragraph {}.", n),
        };
        Ok(LlmResponse {
            content,
            usage: UsageMetadata::default(),
            model: "scripted".into(),
        })
    }
}

/// Model stub replaying raw responses in order; the last one repeats.
pub struct SequenceProvider {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    pub calls: Arc<AtomicUsize>,
    /// Invoked with the call number before replying
    pub on_call: Option<Box<dyn Fn(usize) + Send + Sync>>,
}

impl SequenceProvider {
    pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            last: Mutex::new(None),
            calls: Arc::new(AtomicUsize::new(0)),
            on_call: None,
        }
    }
}

#[async_trait]
impl LlmProvider for SequenceProvider {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.on_call {
            hook(n);
        }

        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err("no scripted reply".into())),
        };

        match reply {
            Ok(content) => Ok(LlmResponse {
                content,
                usage: UsageMetadata::default(),
                model: "sequence".into(),
            }),
            Err(e) => Err(anyhow!(e)),
        }
    }
}

pub fn body(chars: usize) -> String {
    "Lorem ipsum dolor sit amet. ".chars().cycle().take(chars).collect()
}

/// Article fetcher returning a fixed body for every item, or nothing.
pub struct StubFetcher {
    pub body_chars: Option<usize>,
    pub images: usize,
    pub calls: Arc<AtomicUsize>,
}

impl StubFetcher {
    pub fn with_body(chars: usize) -> Self {
        Self {
            body_chars: Some(chars),
            images: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self {
            body_chars: None,
            images: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ArticleFetcher for StubFetcher {
    async fn fetch(&self, item: &FeedItem) -> Result<Option<Article>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body_chars.map(|chars| Article {
            title: item.title.clone(),
            body_text: body(chars),
            image_count: self.images,
            source_name: "Test Source".into(),
            link: item.link.clone(),
            published_at: item.published_at,
        }))
    }
}

/// Sink keeping stored materials in memory.
#[derive(Default)]
pub struct MemorySink {
    pub stored: Mutex<Vec<(MaterialDraft, Article)>>,
}

impl MemorySink {
    pub fn count(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn store(&self, draft: &MaterialDraft, article: &Article) -> Result<String> {
        let mut stored = self.stored.lock().unwrap();
        stored.push((draft.clone(), article.clone()));
        Ok(format!("mem-{}", stored.len()))
    }
}

/// Sink whose every store takes `delay`; `started` counts stores begun.
pub struct SlowSink {
    pub inner: MemorySink,
    pub started: Arc<AtomicUsize>,
    pub delay: std::time::Duration,
}

impl SlowSink {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            inner: MemorySink::default(),
            started: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }
}

#[async_trait]
impl PersistenceSink for SlowSink {
    async fn store(&self, draft: &MaterialDraft, article: &Article) -> Result<String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.store(draft, article).await
    }
}

pub const RSS_TWO_ITEMS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test feed</title>
    <link>https://news.test/</link>
    <description>Test</description>
    <item>
      <title>First story</title>
      <link>https://news.test/first</link>
      <guid>first-guid</guid>
      <description>The first summary.</description>
      <pubDate>Mon, 06 May 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second story</title>
      <link>https://news.test/second</link>
      <guid>second-guid</guid>
      <description>The second summary.</description>
    </item>
  </channel>
</rss>"#;
