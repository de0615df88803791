// Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use orchestrator::testing::ScriptedPipeline;
use orchestrator::{EngineConfig, JobEvent, MemoryStore, Orchestrator, Phase, RetryPolicy};
use tokio::sync::broadcast;

/// Retries with millisecond backoff so failure paths stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

pub fn fast_config() -> EngineConfig {
    EngineConfig::new().with_retry_for_all(fast_retry())
}

pub fn engine(store: &Arc<MemoryStore>, pipeline: &ScriptedPipeline) -> Orchestrator {
    engine_with(store, pipeline, fast_config())
}

pub fn engine_with(store: &Arc<MemoryStore>, pipeline: &ScriptedPipeline, config: EngineConfig) -> Orchestrator {
    Orchestrator::new(store.clone(), pipeline.registry(), config)
}

/// Everything published so far.
pub fn drain(events: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

pub fn phases_started(events: &[JobEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::PhaseStarted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

pub const EARLY_PHASES: [Phase; 5] = [
    Phase::Research,
    Phase::CompetitorAnalysis,
    Phase::Strategy,
    Phase::ContentPlan,
    Phase::Image,
];

pub const LATE_PHASES: [Phase; 5] = [
    Phase::Writing,
    Phase::LinkEnrichment,
    Phase::Meta,
    Phase::Category,
    Phase::Publish,
];
