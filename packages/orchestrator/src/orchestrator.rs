//! Orchestrator driver loop.
//!
//! ```text
//! submit ─► duplicate guard ─┬─ completed ─► AlreadyCompleted (no phase runs)
//!                            ├─ in flight ─► DuplicateInFlight error
//!                            └─ none ─► resume or init
//!                                          │
//!          for each pipeline phase not yet completed:
//!              worker via retry executor ─► record output ─► checkpoint
//!              optional failure: warning + complete_phase
//!              required failure: mark_failed, checkpoint, error
//!                                          │
//!          mark_completed ─► final checkpoint ─► ledger ─► persist result
//! ```
//!
//! Phases run strictly in order. Jobs are independent and may run
//! concurrently on one `Orchestrator`; two runs of the same job id are
//! kept apart only by the guard's in-flight check.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::CheckpointManager;
use crate::error::{OrchestratorError, Result};
use crate::events::JobEvent;
use crate::guard::{DuplicateCheck, DuplicateGuard};
use crate::retry::{ErrorClassifier, ErrorStats, RetryExecutor, RetryFailure, RetryStats};
use crate::traits::store::{
    CheckpointStore, CompletedWork, EngineStore, JobRecord, JobStatus, ResultSink, SubmissionLedger,
};
use crate::traits::worker::{StepInput, StepWorker};
use crate::types::config::{EngineConfig, PhasePolicy};
use crate::types::ids::JobId;
use crate::types::job_state::{JobState, TargetConfig};
use crate::types::output::PhaseOutput;
use crate::types::phase::{Criticality, Phase};
use crate::types::result::JobResult;
use crate::workers::{LinkEnrichmentWorker, WorkerRegistry};

const EVENT_CAPACITY: usize = 256;

/// A unit of work to run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_id: JobId,
    pub scope: String,
    pub subject: String,
    pub target: TargetConfig,
}

impl JobRequest {
    /// New job with a fresh id and default target.
    pub fn new(scope: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            scope: scope.into(),
            subject: subject.into(),
            target: TargetConfig::default(),
        }
    }

    /// Reuse an existing id, e.g. to resume after a restart.
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }
}

/// Successful end of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The pipeline ran to completion.
    Completed(JobResult),
    /// Equivalent work had already finished; nothing ran.
    AlreadyCompleted(JobResult),
}

impl JobOutcome {
    pub fn result(&self) -> &JobResult {
        match self {
            JobOutcome::Completed(result) | JobOutcome::AlreadyCompleted(result) => result,
        }
    }

    pub fn into_result(self) -> JobResult {
        match self {
            JobOutcome::Completed(result) | JobOutcome::AlreadyCompleted(result) => result,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, JobOutcome::AlreadyCompleted(_))
    }
}

/// Why a single phase produced no output.
#[derive(Debug, Error)]
enum PhaseError {
    #[error("no worker registered for phase {0}")]
    NoWorker(Phase),

    #[error(transparent)]
    Step(#[from] RetryFailure),

    #[error("worker for {expected} returned output for {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("worker for {0} returned no output")]
    NoOutput(Phase),
}

impl PhaseError {
    fn attempts(&self) -> u32 {
        match self {
            PhaseError::Step(failure) => failure.attempts,
            PhaseError::NoWorker(_) => 0,
            PhaseError::WrongPhase { .. } | PhaseError::NoOutput(_) => 1,
        }
    }
}

/// Drives jobs through the phase pipeline.
pub struct Orchestrator {
    checkpoints: Arc<dyn CheckpointStore>,
    ledger: Arc<dyn SubmissionLedger>,
    results: Arc<dyn ResultSink>,
    workers: WorkerRegistry,
    config: EngineConfig,
    guard: DuplicateGuard,
    retry: RetryExecutor,
    events: broadcast::Sender<JobEvent>,
}

impl Orchestrator {
    /// Build over a single store backend.
    ///
    /// When no link enrichment worker is registered, the built-in
    /// [`LinkEnrichmentWorker`] is used with the store as link source.
    pub fn new<S: EngineStore + 'static>(store: Arc<S>, mut workers: WorkerRegistry, config: EngineConfig) -> Self {
        if !workers.is_registered(Phase::LinkEnrichment) {
            workers.register(Arc::new(LinkEnrichmentWorker::new(
                store.clone(),
                config.links.clone(),
            )));
        }
        Self::from_parts(store.clone(), store.clone(), store, workers, config)
    }

    /// Build from separate store seams.
    pub fn from_parts(
        checkpoints: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn SubmissionLedger>,
        results: Arc<dyn ResultSink>,
        workers: WorkerRegistry,
        config: EngineConfig,
    ) -> Self {
        let guard = DuplicateGuard::new(ledger.clone(), config.guard.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            checkpoints,
            ledger,
            results,
            workers,
            config,
            guard,
            retry: RetryExecutor::new(Arc::new(ErrorClassifier::new())),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    pub fn error_stats(&self) -> ErrorStats {
        self.retry.classifier().stats()
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run the duplicate guard for a submission.
    pub async fn check_duplicate(&self, scope: &str, subject: &str, own_job: Option<JobId>) -> DuplicateCheck {
        self.guard.check(scope, subject, own_job).await
    }

    /// Load a job's checkpointed state.
    pub async fn inspect(&self, job_id: JobId) -> Result<Option<JobState>> {
        Ok(CheckpointManager::new(job_id, self.checkpoints.clone()).load().await?)
    }

    /// Delete checkpoints older than the configured retention.
    pub async fn sweep_checkpoints(&self) -> Result<usize> {
        Ok(CheckpointManager::sweep(self.checkpoints.as_ref(), self.config.checkpoint_retention()).await?)
    }

    /// Submit a job: dedup, then resume or start fresh, then run.
    #[instrument(skip_all, fields(job_id = %request.job_id, scope = %request.scope))]
    pub async fn submit(&self, request: JobRequest) -> Result<JobOutcome> {
        let job_id = request.job_id;

        if let Some(outcome) = self.screen(job_id, &request.scope, &request.subject).await? {
            return Ok(outcome);
        }

        let checkpoints = CheckpointManager::new(job_id, self.checkpoints.clone());
        let point = checkpoints.resume().await;

        let state = match point.state {
            Some(state) if state.current_phase == Phase::Completed => {
                info!(job_id = %job_id, "job already completed, returning checkpointed result");
                return Ok(JobOutcome::AlreadyCompleted(JobResult::from_state(job_id, &state)));
            }
            Some(state) if state.is_terminal() => {
                return Err(OrchestratorError::AlreadyTerminal {
                    job_id,
                    phase: state.current_phase,
                });
            }
            Some(state) => {
                let from_phase = point.resume_phase.unwrap_or(Phase::Completed);
                info!(job_id = %job_id, from_phase = %from_phase, "resuming job");
                self.emit(JobEvent::Resumed {
                    job_id,
                    from_phase,
                    completed: state.completed_phases.len(),
                });
                state
            }
            None => {
                info!(job_id = %job_id, subject = %request.subject, "starting job");
                self.emit(JobEvent::Started {
                    job_id,
                    subject: request.subject.clone(),
                });
                JobState::new(request.scope, request.subject, request.target)
            }
        };

        self.run(job_id, state, &checkpoints).await
    }

    /// Manually resume a FAILED job from its first incomplete phase.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn retry_failed(&self, job_id: JobId) -> Result<JobOutcome> {
        let checkpoints = CheckpointManager::new(job_id, self.checkpoints.clone());
        let mut state = checkpoints
            .load()
            .await?
            .ok_or(OrchestratorError::NotFound { job_id })?;

        let Some(from_phase) = state.reopen() else {
            return Err(OrchestratorError::NotFailed {
                job_id,
                phase: state.current_phase,
            });
        };

        if let Some(outcome) = self.screen(job_id, &state.scope, &state.subject_key).await? {
            return Ok(outcome);
        }

        info!(job_id = %job_id, from_phase = %from_phase, "reopening failed job");
        self.emit(JobEvent::Resumed {
            job_id,
            from_phase,
            completed: state.completed_phases.len(),
        });
        self.run(job_id, state, &checkpoints).await
    }

    /// Duplicate screening. `Some` short-circuits the submission.
    async fn screen(&self, job_id: JobId, scope: &str, subject: &str) -> Result<Option<JobOutcome>> {
        match self.guard.check(scope, subject, Some(job_id)).await {
            DuplicateCheck::NoDuplicate => Ok(None),
            DuplicateCheck::Completed { locator, work } => {
                info!(job_id = %job_id, locator = %locator, "equivalent work already completed");
                self.emit(JobEvent::DuplicateDetected {
                    job_id,
                    locator,
                    in_flight: false,
                });
                Ok(Some(JobOutcome::AlreadyCompleted(JobResult::from_completed_work(&work))))
            }
            DuplicateCheck::InFlight { locator, job_id: running } => {
                warn!(job_id = %job_id, running = %running, "equivalent job in flight, rejecting");
                self.emit(JobEvent::DuplicateDetected {
                    job_id,
                    locator: locator.clone(),
                    in_flight: true,
                });
                Err(OrchestratorError::DuplicateInFlight {
                    locator,
                    job_id: Some(running),
                })
            }
        }
    }

    async fn run(&self, job_id: JobId, mut state: JobState, checkpoints: &CheckpointManager) -> Result<JobOutcome> {
        let started = Instant::now();
        self.record_job(job_id, &state, JobStatus::Processing).await;

        for phase in Phase::PIPELINE {
            if state.is_phase_completed(phase) {
                debug!(job_id = %job_id, phase = %phase, "phase already completed, skipping");
                continue;
            }

            state.set_phase(phase);
            self.emit(JobEvent::PhaseStarted { job_id, phase });
            let policy = self.config.policy(phase);

            match self.run_phase(job_id, &state, phase, &policy).await {
                Ok((output, attempts)) => {
                    state.record_output(output);
                    info!(job_id = %job_id, phase = %phase, attempts, "phase completed");
                    self.emit(JobEvent::PhaseCompleted {
                        job_id,
                        phase,
                        attempts,
                    });
                }
                Err(failure) if policy.criticality == Criticality::Optional => {
                    warn!(job_id = %job_id, phase = %phase, error = %failure, "optional phase failed, continuing degraded");
                    state.add_warning(phase, failure.to_string());
                    state.complete_phase(phase);
                    self.emit(JobEvent::PhaseDegraded {
                        job_id,
                        phase,
                        reason: failure.to_string(),
                    });
                }
                Err(failure) => return Err(self.fail(job_id, state, phase, failure, checkpoints).await),
            }

            self.checkpoint(job_id, checkpoints, &state).await;
        }

        state.mark_completed();
        self.checkpoint(job_id, checkpoints, &state).await;

        let result = JobResult::from_state(job_id, &state);
        self.record_job(job_id, &state, JobStatus::Completed).await;
        let work = CompletedWork {
            job_id,
            scope: state.scope.clone(),
            subject: state.subject_key.clone(),
            locator: result.locator.clone().unwrap_or_else(|| format!("job:{job_id}")),
            title: result.title.clone(),
            completed_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record_completed(&work).await {
            warn!(job_id = %job_id, error = %e, "failed to record completed work");
        }

        // Generation succeeded; storage trouble here never fails the job
        if let Err(e) = self.results.persist_result(&result).await {
            error!(job_id = %job_id, error = %e, "failed to persist final result");
        }

        if self.config.clear_checkpoint_on_success {
            checkpoints.clear().await;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(job_id = %job_id, duration_ms, warnings = state.warnings.len(), "job completed");
        self.emit(JobEvent::Completed { job_id, duration_ms });

        Ok(JobOutcome::Completed(result))
    }

    async fn run_phase(
        &self,
        job_id: JobId,
        state: &JobState,
        phase: Phase,
        policy: &PhasePolicy,
    ) -> std::result::Result<(PhaseOutput, u32), PhaseError> {
        let worker: &dyn StepWorker = self.workers.get(phase).ok_or(PhaseError::NoWorker(phase))?.as_ref();

        let attempted = self
            .retry
            .execute(phase, &policy.retry, |attempt| {
                worker.execute(StepInput {
                    job_id,
                    phase,
                    scope: &state.scope,
                    subject: &state.subject_key,
                    target: &state.target_config,
                    outputs: &state.phase_outputs,
                    attempt,
                })
            })
            .await?;

        let actual = attempted.value.phase();
        if actual != phase {
            return Err(PhaseError::WrongPhase {
                expected: phase,
                actual,
            });
        }
        if attempted.value.is_degraded() {
            return Err(PhaseError::NoOutput(phase));
        }
        Ok((attempted.value, attempted.attempts))
    }

    /// Required-phase failure: capture it in the state, persist, report.
    async fn fail(
        &self,
        job_id: JobId,
        mut state: JobState,
        phase: Phase,
        failure: PhaseError,
        checkpoints: &CheckpointManager,
    ) -> OrchestratorError {
        let message = failure.to_string();
        error!(job_id = %job_id, phase = %phase, error = %message, "required phase failed");
        self.emit(JobEvent::PhaseFailed {
            job_id,
            phase,
            error: message.clone(),
            attempts: failure.attempts(),
        });

        state.mark_failed(Some(&failure));
        self.checkpoint(job_id, checkpoints, &state).await;
        self.record_job(job_id, &state, JobStatus::Failed).await;
        self.emit(JobEvent::Failed {
            job_id,
            phase,
            error: message.clone(),
        });

        OrchestratorError::PhaseFailed {
            phase,
            message,
            has_partial_output: state.has_partial_output(),
        }
    }

    /// Save, logging loudly on failure. The job continues either way.
    async fn checkpoint(&self, job_id: JobId, checkpoints: &CheckpointManager, state: &JobState) {
        if let Err(e) = checkpoints.save(state).await {
            error!(
                job_id = %job_id,
                phase = %state.current_phase,
                error = %e,
                "checkpoint save failed, continuing without durability"
            );
            self.emit(JobEvent::CheckpointFailed {
                job_id,
                phase: state.current_phase,
                error: e.to_string(),
            });
        }
    }

    async fn record_job(&self, job_id: JobId, state: &JobState, status: JobStatus) {
        let record = JobRecord {
            job_id,
            scope: state.scope.clone(),
            subject: state.subject_key.clone(),
            status,
            created_at: state.started_at,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.ledger.upsert_job(&record).await {
            warn!(job_id = %job_id, status = ?status, error = %e, "failed to update job record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::stores::MemoryStore;
    use crate::testing::{ScriptedPipeline, ScriptedWorker};
    use crate::types::config::RetryPolicy;

    fn orchestrator(store: &Arc<MemoryStore>, pipeline: &ScriptedPipeline) -> Orchestrator {
        let config = EngineConfig::new().with_retry_for_all(RetryPolicy::no_retry());
        Orchestrator::new(store.clone(), pipeline.registry(), config)
    }

    #[tokio::test]
    async fn test_full_run_records_every_phase() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new();
        let orchestrator = orchestrator(&store, &pipeline);
        let request = JobRequest::new("t", "pour over coffee");
        let job_id = request.job_id;

        let outcome = orchestrator.submit(request).await.unwrap();
        assert!(!outcome.is_reused());
        assert_eq!(
            outcome.result().locator.as_deref(),
            Some("https://blog.example/pour-over-coffee")
        );

        for phase in Phase::PIPELINE {
            assert_eq!(pipeline.call_count(phase), 1, "{phase}");
        }

        let state = orchestrator.inspect(job_id).await.unwrap().unwrap();
        assert_eq!(state.current_phase, Phase::Completed);
        assert_eq!(state.completed_phases.len(), Phase::PIPELINE.len());
        assert_eq!(store.job(job_id).unwrap().status, JobStatus::Completed);
        assert_eq!(store.completed_count(), 1);
        assert!(store.result(job_id).is_some());
    }

    #[tokio::test]
    async fn test_workers_see_upstream_outputs() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new();
        orchestrator(&store, &pipeline)
            .submit(JobRequest::new("t", "cold brew"))
            .await
            .unwrap();

        let call = &pipeline.worker(Phase::Writing).unwrap().calls()[0];
        assert_eq!(
            call.visible_outputs,
            vec![
                Phase::Research,
                Phase::CompetitorAnalysis,
                Phase::Strategy,
                Phase::ContentPlan,
                Phase::Image
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_phase_output_fails_required_phase() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new().with(
            ScriptedWorker::new(Phase::Strategy).then(Ok(PhaseOutput::Degraded {
                phase: Phase::Strategy,
            })),
        );

        let err = orchestrator(&store, &pipeline)
            .submit(JobRequest::new("t", "moka pot"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::PhaseFailed {
                phase: Phase::Strategy,
                has_partial_output: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_optional_worker_degrades() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new().without(Phase::Image);
        let orchestrator = orchestrator(&store, &pipeline);
        let request = JobRequest::new("t", "chemex");
        let job_id = request.job_id;

        orchestrator.submit(request).await.unwrap();

        let state = orchestrator.inspect(job_id).await.unwrap().unwrap();
        assert!(state.phase_outputs.get(Phase::Image).unwrap().is_degraded());
        assert_eq!(state.warnings.len(), 1);
        assert_eq!(state.warnings[0].phase, Phase::Image);
        assert!(state.warnings[0].message.contains("no worker"));
    }

    #[tokio::test]
    async fn test_missing_required_worker_fails() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new().without(Phase::Meta);

        let err = orchestrator(&store, &pipeline)
            .submit(JobRequest::new("t", "french press"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseFailed { phase: Phase::Meta, .. }));
        assert_eq!(pipeline.call_count(Phase::Category), 0);
    }

    #[tokio::test]
    async fn test_events_are_published_in_order() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new().with(ScriptedWorker::always_failing(
            Phase::CompetitorAnalysis,
            || StepError::Network("connection reset".into()),
        ));
        let orchestrator = orchestrator(&store, &pipeline);
        let mut events = orchestrator.subscribe();

        orchestrator.submit(JobRequest::new("t", "siphon")).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(JobEvent::Started { .. })));
        assert!(matches!(seen.last(), Some(JobEvent::Completed { .. })));
        assert!(seen.iter().any(|e| matches!(
            e,
            JobEvent::PhaseDegraded {
                phase: Phase::CompetitorAnalysis,
                ..
            }
        )));
        let completed = seen
            .iter()
            .filter(|e| matches!(e, JobEvent::PhaseCompleted { .. }))
            .count();
        assert_eq!(completed, Phase::PIPELINE.len() - 1);
    }

    #[tokio::test]
    async fn test_clear_checkpoint_on_success() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ScriptedPipeline::new();
        let orchestrator = Orchestrator::new(
            store.clone(),
            pipeline.registry(),
            EngineConfig::new().with_clear_checkpoint_on_success(true),
        );

        orchestrator.submit(JobRequest::new("t", "turkish coffee")).await.unwrap();
        assert_eq!(store.checkpoint_count(), 0);
        assert_eq!(store.completed_count(), 1);
    }
}
