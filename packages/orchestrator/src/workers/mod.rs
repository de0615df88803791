//! Step-worker registry and helpers for worker implementations.

mod link_enrichment;

pub use link_enrichment::LinkEnrichmentWorker;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::error::StepResult;
use crate::traits::worker::StepWorker;
use crate::types::phase::Phase;

/// Maps each phase to the worker that produces its output.
///
/// Registering a second worker for the same phase replaces the first.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<Phase, Arc<dyn StepWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn StepWorker>) {
        self.workers.insert(worker.phase(), worker);
    }

    /// Builder-style registration.
    pub fn with_worker(mut self, worker: impl StepWorker + 'static) -> Self {
        self.register(Arc::new(worker));
        self
    }

    pub fn get(&self, phase: Phase) -> Option<&Arc<dyn StepWorker>> {
        self.workers.get(&phase)
    }

    pub fn is_registered(&self, phase: Phase) -> bool {
        self.workers.contains_key(&phase)
    }

    /// Registered phases in pipeline order.
    pub fn registered_phases(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = self.workers.keys().copied().collect();
        phases.sort();
        phases
    }
}

/// Run independent sub-calls with at most `limit` in flight, returning
/// results in input order.
///
/// For workers that fan out inside one phase (e.g. several images). The
/// branches share no mutable state and all finish before the phase does.
pub async fn join_bounded<I, Fut, T>(calls: I, limit: usize) -> Vec<T>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = T>,
{
    stream::iter(calls).buffered(limit.max(1)).collect().await
}

/// Like [`join_bounded`], stopping at the first error.
pub async fn try_join_bounded<I, Fut, T>(calls: I, limit: usize) -> StepResult<Vec<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = StepResult<T>>,
{
    stream::iter(calls).buffered(limit.max(1)).try_collect().await
}
