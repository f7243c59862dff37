use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingestion::FeedSource;
use crate::model::FeedItem;

/// Bounded FIFO set of recently seen dedup keys for one feed.
#[derive(Debug, Default)]
pub struct SeenWindow {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: Option<usize>,
}

impl SeenWindow {
    pub const MIN_CAPACITY: usize = 50;
    pub const BATCH_MULTIPLIER: usize = 10;

    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the capacity from the first batch size. Later calls keep the first value.
    pub fn fix_capacity(&mut self, batch_len: usize) -> usize {
        *self
            .capacity
            .get_or_insert_with(|| (batch_len * Self::BATCH_MULTIPLIER).max(Self::MIN_CAPACITY))
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    /// Records `key`. Returns false if it was already present; evicts the oldest key on overflow.
    pub fn insert(&mut self, key: String) -> bool {
        if self.members.contains(&key) {
            return false;
        }
        self.members.insert(key.clone());
        self.order.push_back(key);

        let capacity = self.capacity.unwrap_or(Self::MIN_CAPACITY);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Polls one feed source on a fixed interval and forwards unseen entries.
pub struct SourcePoller {
    source: Box<dyn FeedSource>,
    interval: Duration,
    skip_first_batch: bool,
    window: SeenWindow,
}

impl SourcePoller {
    pub fn new(source: Box<dyn FeedSource>, interval: Duration, skip_first_batch: bool) -> Self {
        Self {
            source,
            interval,
            skip_first_batch,
            window: SeenWindow::new(),
        }
    }

    pub fn window(&self) -> &SeenWindow {
        &self.window
    }

    /// Runs a single fetch/dedup cycle and returns the items to deliver.
    ///
    /// A "not modified" response is not a batch: it neither fixes the window
    /// capacity nor consumes the skip-first-batch flag.
    pub async fn poll_once(&mut self) -> Result<Vec<FeedItem>> {
        let Some(entries) = self.source.fetch().await? else {
            return Ok(Vec::new());
        };

        let capacity = self.window.fix_capacity(entries.len());
        let suppress = std::mem::take(&mut self.skip_first_batch);
        let source_id = self.source.source_id().to_string();
        let feed_url = self.source.feed_url().to_string();

        let mut fresh = Vec::new();
        let total = entries.len();
        for entry in entries {
            let Some(item) = FeedItem::from_entry(&source_id, &feed_url, entry) else {
                debug!(feed = %feed_url, "skipping entry without id, link or title");
                continue;
            };
            if !self.window.insert(item.external_id.clone()) {
                continue;
            }
            if !suppress {
                fresh.push(item);
            }
        }

        if suppress {
            info!(feed = %feed_url, entries = total, capacity, "first batch recorded without delivery");
        } else {
            debug!(feed = %feed_url, entries = total, new = fresh.len(), "feed polled");
        }
        Ok(fresh)
    }

    /// Poll loop. Ends when `cancel` fires or the receiving side is gone.
    pub async fn run(mut self, tx: UnboundedSender<FeedItem>, cancel: CancellationToken) {
        let feed_url = self.source.feed_url().to_string();
        info!(feed = %feed_url, interval_secs = self.interval.as_secs(), "poller started");

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.poll_once() => polled,
            };

            match polled {
                Ok(items) => {
                    for item in items {
                        info!(feed = %feed_url, title = %item.title, "new item");
                        if tx.send(item).is_err() {
                            debug!(feed = %feed_url, "delivery queue closed");
                            return;
                        }
                    }
                }
                Err(e) => warn!(feed = %feed_url, "fetch error: {:#}", e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(feed = %feed_url, "poller stopped");
    }

    pub fn spawn(self, tx: UnboundedSender<FeedItem>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(tx, cancel))
    }
}
