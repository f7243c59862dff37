use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::llm::prompts::{self, FilterVerdict, ScoreVerdict, Synthesis};
use crate::llm::{GatewayError, LlmGateway};
use crate::model::{Article, DropReason, FeedItem, MaterialDraft, PipelineOutcome, Stage};
use crate::registry::SourceRegistry;
use crate::scraping::ArticleFilter;
use crate::storage::PersistenceSink;

/// How much drafting work each item gets.
#[derive(Debug, Clone, Copy)]
pub struct PipelineLimits {
    pub candidates: usize,
    pub scoring_rounds: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            candidates: 3,
            scoring_rounds: 3,
        }
    }
}

impl From<&common::GeneratorConfig> for PipelineLimits {
    fn from(cfg: &common::GeneratorConfig) -> Self {
        Self {
            candidates: cfg.candidates,
            scoring_rounds: cfg.scoring_rounds,
        }
    }
}

/// Turns one feed item into a stored material, or drops it with a reason.
pub struct GenerationPipeline {
    registry: Arc<SourceRegistry>,
    filter: ArticleFilter,
    gateway: LlmGateway,
    limits: PipelineLimits,
    sink: Arc<dyn PersistenceSink>,
}

impl GenerationPipeline {
    pub fn new(
        registry: Arc<SourceRegistry>,
        filter: ArticleFilter,
        gateway: LlmGateway,
        limits: PipelineLimits,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            registry,
            filter,
            gateway,
            limits,
            sink,
        }
    }

    /// Runs every stage up to (not including) persistence.
    pub async fn process(&self, item: &FeedItem) -> PipelineOutcome {
        info!(source = %item.source_id, "new item: {}", item.title);

        let article = match self.fetch_article(item).await {
            Ok(article) => article,
            Err(reason) => return PipelineOutcome::rejected(Stage::Fetching, reason),
        };

        // Filtering
        let prompt = prompts::filter(&article.title, item.summary(), &article.body_text);
        let verdict: FilterVerdict = match self.gateway.invoke(&prompt).await {
            Ok(v) => v,
            Err(e) => return gateway_failure(Stage::Filtering, e),
        };
        if !verdict.is_useful() {
            let reason = verdict.reason_text();
            return PipelineOutcome::rejected(Stage::Filtering, DropReason::Filtered { reason });
        }
        debug!("passed relevance filter: {}", article.title);

        // Synthesizing
        let prompt = prompts::synthesize(&article.title, &article.body_text);
        let synthesis: Synthesis = match self.gateway.invoke(&prompt).await {
            Ok(s) => s,
            Err(e) => return gateway_failure(Stage::Synthesizing, e),
        };
        let mut draft = MaterialDraft {
            title: synthesis.title.trim().to_string(),
            summary: synthesis.summary.trim().to_string(),
            themes: synthesis.themes.joined(),
            candidate_texts: Vec::with_capacity(self.limits.candidates),
        };
        info!("material synthesized: {}", draft.title);

        // Drafting: candidates are independent, but the item waits for all of them.
        let runs = (0..self.limits.candidates).map(|i| self.candidate(i + 1, &draft));
        let results = futures::future::join_all(runs).await;

        let mut failure = None;
        for result in results {
            match result {
                Ok(text) => draft.candidate_texts.push(text),
                Err((stage, e)) => {
                    if failure.is_none() {
                        failure = Some(gateway_failure(stage, e));
                    }
                }
            }
        }
        if let Some(outcome) = failure {
            return outcome;
        }

        PipelineOutcome::Accepted { draft, article }
    }

    async fn fetch_article(&self, item: &FeedItem) -> Result<Article, DropReason> {
        let fetcher = self.registry.fetcher(&item.source_id).ok_or_else(|| {
            warn!(source = %item.source_id, "no article parser registered for source");
            DropReason::Fetch
        })?;

        let article = match fetcher.fetch(item).await {
            Ok(Some(article)) => article,
            Ok(None) => return Err(DropReason::Fetch),
            Err(e) => {
                warn!(link = %item.link, "article fetch failed: {:#}", e);
                return Err(DropReason::Fetch);
            }
        };
        debug!(chars = article.body_text.chars().count(), images = article.image_count, "article fetched: {}", article.title);

        if item.summary().is_empty() {
            return Err(DropReason::NoSummary);
        }
        if !self.filter.is_quality_content(&article) {
            return Err(DropReason::LowQuality);
        }
        Ok(article)
    }

    /// Draft, then score/rewrite up to `scoring_rounds` times. A rejection in the last
    /// round still gets its rewrite, which is kept unscored.
    async fn candidate(
        &self,
        index: usize,
        material: &MaterialDraft,
    ) -> Result<String, (Stage, GatewayError)> {
        let prompt = prompts::draft(&material.title, &material.summary, &material.themes);
        let mut text = self
            .gateway
            .invoke_text(&prompt)
            .await
            .map_err(|e| (Stage::Drafting, e))?;
        debug!(candidate = index, "first draft ready");

        for round in 1..=self.limits.scoring_rounds {
            let prompt = prompts::score(&material.summary, &material.themes, &text);
            let verdict: ScoreVerdict = self
                .gateway
                .invoke(&prompt)
                .await
                .map_err(|e| (Stage::Scoring, e))?;
            if verdict.is_ok() {
                info!(candidate = index, round, "candidate accepted");
                return Ok(text);
            }
            debug!(candidate = index, round, "candidate rejected, rewriting");

            let advice = verdict.reason_text();
            let prompt = prompts::rewrite(&text, &advice, &material.summary, &material.themes);
            text = self
                .gateway
                .invoke_text(&prompt)
                .await
                .map_err(|e| (Stage::Rewriting, e))?;
        }

        info!(candidate = index, "scoring rounds exhausted, keeping last rewrite");
        Ok(text)
    }

    /// Persists an accepted outcome and logs the rest. Not cancellable: a material
    /// that reaches this point is either stored whole or reported as failed.
    pub async fn finish(&self, item: &FeedItem, outcome: PipelineOutcome) -> Option<String> {
        match outcome {
            PipelineOutcome::Accepted { draft, article } => {
                match self.sink.store(&draft, &article).await {
                    Ok(id) => {
                        info!(material_id = %id, "material saved: {}", draft.title);
                        Some(id)
                    }
                    Err(e) => {
                        error!("failed to store material \"{}\": {:#}", draft.title, e);
                        None
                    }
                }
            }
            PipelineOutcome::Rejected { stage, reason } => {
                match &reason {
                    DropReason::StageFailure { .. } => {
                        error!(stage = %stage, "item dropped ({}): {}", reason, item.title)
                    }
                    DropReason::Fetch | DropReason::ParseError => {
                        warn!(stage = %stage, "item dropped ({}): {}", reason, item.title)
                    }
                    _ => info!(stage = %stage, "item dropped ({}): {}", reason, item.title),
                }
                None
            }
            PipelineOutcome::Cancelled { stage } => {
                debug!(stage = %stage, "run cancelled: {}", item.title);
                None
            }
        }
    }
}

fn gateway_failure(stage: Stage, err: GatewayError) -> PipelineOutcome {
    match err {
        GatewayError::Cancelled => PipelineOutcome::Cancelled { stage },
        GatewayError::Malformed { .. } => PipelineOutcome::rejected(stage, DropReason::ParseError),
        GatewayError::Provider(e) => PipelineOutcome::rejected(
            stage,
            DropReason::StageFailure {
                error: format!("{:#}", e),
            },
        ),
    }
}
