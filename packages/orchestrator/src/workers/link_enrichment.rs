//! Built-in worker for the link enrichment phase.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::StepResult;
use crate::links::{insert_links, LinkCandidate, LinkConfig, LinkInput};
use crate::traits::store::LinkSource;
use crate::traits::worker::{StepInput, StepWorker};
use crate::types::output::{require, LinkEnrichmentOutput, PhaseOutput, ResearchOutput};
use crate::types::phase::Phase;

const DEFAULT_CANDIDATE_LIMIT: usize = 50;

/// Runs the Link Insertion Engine over the written article.
///
/// Internal candidates come from the [`LinkSource`] (earlier completed
/// work in the same scope); external candidates come from the research
/// phase's sources.
pub struct LinkEnrichmentWorker {
    source: Arc<dyn LinkSource>,
    config: LinkConfig,
    candidate_limit: usize,
}

impl LinkEnrichmentWorker {
    pub fn new(source: Arc<dyn LinkSource>, config: LinkConfig) -> Self {
        Self {
            source,
            config,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }
}

/// Research sources as external candidates. A research keyword mentioned
/// by a source becomes one of its anchor phrases.
fn external_candidates(research: &ResearchOutput) -> Vec<LinkCandidate> {
    research
        .sources
        .iter()
        .filter(|s| !s.url.trim().is_empty())
        .map(|source| {
            let described = format!(
                "{} {}",
                source.title.to_lowercase(),
                source.snippet.as_deref().unwrap_or_default().to_lowercase()
            );
            let mut anchors: Vec<String> = research
                .keywords
                .iter()
                .filter(|k| !k.trim().is_empty() && described.contains(&k.to_lowercase()))
                .cloned()
                .collect();
            anchors.push(source.title.clone());

            LinkCandidate::new(source.url.clone(), source.title.clone())
                .with_anchors(anchors)
                .with_keywords(source.snippet.iter().cloned().collect())
        })
        .collect()
}

#[async_trait]
impl StepWorker for LinkEnrichmentWorker {
    fn phase(&self) -> Phase {
        Phase::LinkEnrichment
    }

    async fn execute(&self, input: StepInput<'_>) -> StepResult<PhaseOutput> {
        let writing = require(Phase::Writing, input.outputs.writing())?;

        let internal = self
            .source
            .internal_candidates(input.scope, input.subject, self.candidate_limit)
            .await?;
        let external = input
            .outputs
            .research()
            .map(external_candidates)
            .unwrap_or_default();

        let primary_subject = input
            .outputs
            .strategy()
            .map(|s| s.primary_keyword.as_str())
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(input.subject);

        let result = insert_links(
            &LinkInput {
                markup: &writing.html,
                internal: &internal,
                external: &external,
                primary_subject,
            },
            &self.config,
        );

        info!(
            job_id = %input.job_id,
            internal_candidates = internal.len(),
            external_candidates = external.len(),
            inserted = result.stats.total_inserted,
            rejected = result.stats.rejected_low_score,
            "links inserted"
        );

        Ok(PhaseOutput::LinkEnrichment(LinkEnrichmentOutput {
            html: result.html,
            stats: result.stats,
            links: result.links,
        }))
    }
}
