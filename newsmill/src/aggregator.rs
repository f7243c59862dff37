use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ingestion::FeedSource;
use crate::model::FeedItem;
use crate::poller::SourcePoller;

/// Runs one poller per feed source and merges their output into a single queue.
///
/// Items from one source arrive in feed order; there is no ordering between sources.
/// The queue is unbounded, so a slow consumer never causes items to be dropped.
pub struct FanInAggregator {
    receiver: Mutex<mpsc::UnboundedReceiver<FeedItem>>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl FanInAggregator {
    /// Spawns the pollers. `cancel` is owned by the aggregator; pass a child token to tie
    /// it to a wider shutdown.
    pub fn start(
        sources: Vec<Box<dyn FeedSource>>,
        interval: Duration,
        skip_first_batch: bool,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let pollers: Vec<JoinHandle<()>> = sources
            .into_iter()
            .map(|source| {
                SourcePoller::new(source, interval, skip_first_batch).spawn(tx.clone(), cancel.clone())
            })
            .collect();

        info!(pollers = pollers.len(), skip_first_batch, "fan-in aggregator started");

        Self {
            receiver: Mutex::new(rx),
            pollers: Mutex::new(pollers),
            cancel,
        }
    }

    /// Next merged item. Returns `None` once the aggregator is cancelled.
    ///
    /// Safe to call from several workers: each item is handed to exactly one caller.
    pub async fn next(&self) -> Option<FeedItem> {
        let mut receiver = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            receiver = self.receiver.lock() => receiver,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = receiver.recv() => item,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels every poller and waits for all of them to finish.
    ///
    /// Returns the number of poller tasks joined by this call; a second call joins none.
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pollers.lock().await);
        let mut joined = 0;
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("poller task failed: {}", e);
            }
            joined += 1;
        }

        info!(pollers = joined, "fan-in aggregator stopped");
        joined
    }
}
