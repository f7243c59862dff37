use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator::FanInAggregator;
use crate::llm::LlmGateway;
use crate::processing::{GenerationPipeline, PipelineLimits};
use crate::registry::SourceRegistry;
use crate::scraping::ArticleFilter;
use crate::storage::PersistenceSink;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("generator is already running")]
    AlreadyRunning,

    #[error("generator is not running")]
    NotRunning,

    #[error("generator is still stopping")]
    Stopping,

    #[error("failed to start generator: {0:#}")]
    Startup(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub workers: usize,
    pub skip_first_batch_on_restart: bool,
    pub limits: PipelineLimits,
    pub filter: ArticleFilter,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            workers: 1,
            skip_first_batch_on_restart: true,
            limits: PipelineLimits::default(),
            filter: ArticleFilter::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &common::Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(cfg.generator.poll_interval_seconds),
            workers: cfg.generator.workers,
            skip_first_batch_on_restart: cfg.generator.skip_first_batch_on_restart,
            limits: PipelineLimits::from(&cfg.generator),
            filter: ArticleFilter::from(&cfg.filter),
        }
    }
}

struct RunningGenerator {
    cancel: CancellationToken,
    aggregator: Arc<FanInAggregator>,
    workers: Vec<JoinHandle<()>>,
}

impl RunningGenerator {
    async fn shutdown(mut self) {
        self.cancel.cancel();

        let workers = std::mem::take(&mut self.workers);
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("pipeline worker failed: {}", e);
            }
        }
        let pollers = self.aggregator.shutdown().await;
        debug!(pollers, "generator tasks joined");
    }
}

impl Drop for RunningGenerator {
    fn drop(&mut self) {
        // Tasks of a generator dropped without `stop()` must still wind down.
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct EngineState {
    running: Option<RunningGenerator>,
    /// Set while a taken-out generator is being joined, outside the lock.
    stopping: bool,
    started_before: bool,
}

/// Owns the generator: at most one running set of pollers and pipeline workers.
pub struct Engine {
    registry: Arc<SourceRegistry>,
    gateway: LlmGateway,
    sink: Arc<dyn PersistenceSink>,
    settings: EngineSettings,
    state: Arc<Mutex<EngineState>>,
}

impl Engine {
    pub fn new(
        registry: Arc<SourceRegistry>,
        gateway: LlmGateway,
        sink: Arc<dyn PersistenceSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            sink,
            settings,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// True while a stopped generator's tasks are still being joined.
    pub async fn is_stopping(&self) -> bool {
        self.state.lock().await.stopping
    }

    /// Spawns the pollers and pipeline workers.
    ///
    /// The first start of the process delivers the first batch of every feed; later
    /// starts only refill the seen-sets (unless disabled in configuration).
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        if state.stopping {
            return Err(EngineError::Stopping);
        }

        let feeds = self.registry.feed_sources();
        if feeds.is_empty() {
            return Err(EngineError::Startup(anyhow::anyhow!(
                "no feed sources configured"
            )));
        }
        let feed_count = feeds.len();
        let skip_first_batch = state.started_before && self.settings.skip_first_batch_on_restart;

        let cancel = CancellationToken::new();
        let aggregator = Arc::new(FanInAggregator::start(
            feeds,
            self.settings.poll_interval,
            skip_first_batch,
            cancel.child_token(),
        ));
        let pipeline = Arc::new(GenerationPipeline::new(
            self.registry.clone(),
            self.settings.filter.clone(),
            self.gateway.with_cancel(cancel.clone()),
            self.settings.limits,
            self.sink.clone(),
        ));

        let workers = (0..self.settings.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    aggregator.clone(),
                    pipeline.clone(),
                    cancel.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            feeds = feed_count,
            workers = workers.len(),
            skip_first_batch,
            "generator started"
        );

        state.running = Some(RunningGenerator {
            cancel,
            aggregator,
            workers,
        });
        state.started_before = true;
        Ok(())
    }

    /// Cancels the running generator and waits until every task has finished.
    ///
    /// The state lock is not held while tasks are joined. `start` is rejected
    /// until the join completes.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let running = {
            let mut state = self.state.lock().await;
            let running = state.running.take().ok_or(EngineError::NotRunning)?;
            state.stopping = true;
            running
        };
        info!("stopping generator");

        // Clears `stopping` even if the caller stops waiting.
        let state = self.state.clone();
        let join = tokio::spawn(async move {
            running.shutdown().await;
            state.lock().await.stopping = false;
        });
        if let Err(e) = join.await {
            error!("generator shutdown task failed: {}", e);
        }

        info!("generator stopped");
        Ok(())
    }
}

async fn run_worker(
    id: usize,
    aggregator: Arc<FanInAggregator>,
    pipeline: Arc<GenerationPipeline>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "pipeline worker started");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = aggregator.next() => match item {
                Some(item) => item,
                None => break,
            },
        };

        // Only the model stages are raced against cancellation; storing is not.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = pipeline.process(&item) => outcome,
        };
        pipeline.finish(&item, outcome).await;
    }
    debug!(worker = id, "pipeline worker stopped");
}
