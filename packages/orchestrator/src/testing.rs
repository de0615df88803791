//! Testing utilities including mock step workers.
//!
//! These let applications exercise the orchestrator without making real
//! generation calls.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{StepError, StepResult};
use crate::traits::worker::{StepInput, StepWorker};
use crate::types::ids::JobId;
use crate::types::output::{
    CategoryOutput, CompetitorOutput, ContentPlanOutput, GeneratedImage, ImageOutput, ImageRole,
    LinkEnrichmentOutput, MetaOutput, PhaseOutput, PlannedSection, PublishOutput, ResearchOutput, ResearchSource,
    StrategyOutput, WritingOutput,
};
use crate::types::phase::Phase;
use crate::workers::WorkerRegistry;

type ErrorFactory = Box<dyn Fn() -> StepError + Send + Sync>;

/// Record of a call made to a scripted worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub job_id: JobId,
    pub attempt: u32,
    /// Phases whose output was visible to the call
    pub visible_outputs: Vec<Phase>,
}

/// A step worker that replays scripted results.
///
/// Each call pops the next scripted result; once the script runs out the
/// worker returns [`default_output`] for its phase (or keeps failing when
/// built with [`ScriptedWorker::always_failing`]). Every call is recorded.
pub struct ScriptedWorker {
    phase: Phase,
    script: RwLock<VecDeque<StepResult<PhaseOutput>>>,
    always_fail: Option<ErrorFactory>,
    delay: Option<Duration>,
    calls: RwLock<Vec<ScriptedCall>>,
}

impl ScriptedWorker {
    /// A worker that always succeeds with the default output.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            script: RwLock::new(VecDeque::new()),
            always_fail: None,
            delay: None,
            calls: RwLock::new(Vec::new()),
        }
    }

    /// A worker that fails every call with a fresh error from `make_error`.
    pub fn always_failing(phase: Phase, make_error: impl Fn() -> StepError + Send + Sync + 'static) -> Self {
        Self {
            always_fail: Some(Box::new(make_error)),
            ..Self::new(phase)
        }
    }

    /// Queue a result for the next unscripted call.
    pub fn then(self, result: StepResult<PhaseOutput>) -> Self {
        self.script.write().unwrap().push_back(result);
        self
    }

    /// Queue `n` failures before falling back to the default output.
    pub fn failing_times(self, n: usize, make_error: impl Fn() -> StepError) -> Self {
        {
            let mut script = self.script.write().unwrap();
            for _ in 0..n {
                script.push_back(Err(make_error()));
            }
        }
        self
    }

    /// Sleep before answering (for timeout tests under a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

#[async_trait]
impl StepWorker for ScriptedWorker {
    fn phase(&self) -> Phase {
        self.phase
    }

    async fn execute(&self, input: StepInput<'_>) -> StepResult<PhaseOutput> {
        self.calls.write().unwrap().push(ScriptedCall {
            job_id: input.job_id,
            attempt: input.attempt,
            visible_outputs: input.outputs.phases().collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(make_error) = &self.always_fail {
            return Err(make_error());
        }

        let scripted = self.script.write().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(default_output(self.phase, &input)),
        }
    }
}

/// A plausible output for `phase`, derived from the job's subject.
///
/// `Init`, `Completed` and `Failed` have no worker and get `Degraded`.
pub fn default_output(phase: Phase, input: &StepInput<'_>) -> PhaseOutput {
    let subject = input.subject;
    let slug: String = subject
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");

    match phase {
        Phase::Research => PhaseOutput::Research(ResearchOutput {
            summary: format!("Research notes on {subject}"),
            sources: vec![ResearchSource {
                url: format!("https://reference.example/{slug}"),
                title: format!("{subject} reference"),
                snippet: None,
            }],
            keywords: vec![subject.to_string()],
        }),
        Phase::CompetitorAnalysis => PhaseOutput::CompetitorAnalysis(CompetitorOutput::default()),
        Phase::Strategy => PhaseOutput::Strategy(StrategyOutput {
            angle: "practical".into(),
            primary_keyword: subject.to_string(),
            secondary_keywords: vec![],
            audience: None,
        }),
        Phase::ContentPlan => PhaseOutput::ContentPlan(ContentPlanOutput {
            sections: vec![PlannedSection {
                heading: format!("Getting started with {subject}"),
                key_points: vec![],
                target_words: input.target.target_words,
            }],
        }),
        Phase::Image => PhaseOutput::Image(ImageOutput {
            images: (0..input.target.image_count)
                .map(|i| GeneratedImage {
                    url: format!("https://img.example/{slug}-{i}.png"),
                    alt: subject.to_string(),
                    role: if i == 0 { ImageRole::Featured } else { ImageRole::Inline },
                })
                .collect(),
        }),
        Phase::Writing => PhaseOutput::Writing(WritingOutput {
            title: format!("A guide to {subject}"),
            html: format!("<h2>Getting started</h2><p>Everything about {subject}.</p>"),
            word_count: 3 + subject.split_whitespace().count(),
        }),
        Phase::LinkEnrichment => {
            let html = input
                .outputs
                .writing()
                .map(|w| w.html.clone())
                .unwrap_or_default();
            PhaseOutput::LinkEnrichment(LinkEnrichmentOutput {
                html,
                ..Default::default()
            })
        }
        Phase::Meta => PhaseOutput::Meta(MetaOutput {
            meta_title: subject.to_string(),
            meta_description: format!("All about {subject}"),
            slug: slug.clone(),
        }),
        Phase::Category => PhaseOutput::Category(CategoryOutput {
            categories: vec!["general".into()],
            tags: vec![],
        }),
        Phase::Publish => PhaseOutput::Publish(PublishOutput {
            locator: format!("https://blog.example/{slug}"),
            published_at: Utc::now(),
        }),
        Phase::Init | Phase::Completed | Phase::Failed => PhaseOutput::Degraded { phase },
    }
}

/// One scripted worker per pipeline phase, kept addressable for assertions.
pub struct ScriptedPipeline {
    workers: HashMap<Phase, Arc<ScriptedWorker>>,
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPipeline {
    /// Every pipeline phase answers with its default output.
    pub fn new() -> Self {
        let workers = Phase::PIPELINE
            .into_iter()
            .map(|phase| (phase, Arc::new(ScriptedWorker::new(phase))))
            .collect();
        Self { workers }
    }

    /// Replace the worker for its phase.
    pub fn with(mut self, worker: ScriptedWorker) -> Self {
        self.workers.insert(worker.phase(), Arc::new(worker));
        self
    }

    /// Drop the worker for `phase`.
    pub fn without(mut self, phase: Phase) -> Self {
        self.workers.remove(&phase);
        self
    }

    pub fn worker(&self, phase: Phase) -> Option<&Arc<ScriptedWorker>> {
        self.workers.get(&phase)
    }

    pub fn call_count(&self, phase: Phase) -> usize {
        self.worker(phase).map_or(0, |w| w.call_count())
    }

    /// Total calls across all phases.
    pub fn total_calls(&self) -> usize {
        self.workers.values().map(|w| w.call_count()).sum()
    }

    pub fn registry(&self) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for worker in self.workers.values() {
            registry.register(worker.clone());
        }
        registry
    }
}
