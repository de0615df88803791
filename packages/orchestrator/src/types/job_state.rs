//! In-memory record of one job's progress.
//!
//! `JobState` is what gets checkpointed. It tracks the current phase, the
//! set of completed phases (append-only), each completed phase's output, and
//! the warnings and fatal errors collected along the way.
//!
//! Two invariants hold after every public operation:
//! - a phase has an output if and only if it is in the completed set
//! - the completed set never shrinks
//!
//! Transition validation beyond that is the orchestrator's job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::output::{PhaseOutput, PhaseOutputs};
use crate::types::phase::Phase;

/// What the job should produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub language: String,
    pub target_words: usize,
    pub image_count: usize,
    #[serde(default)]
    pub tone: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            target_words: 1500,
            image_count: 2,
            tone: None,
        }
    }
}

impl TargetConfig {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_target_words(mut self, words: usize) -> Self {
        self.target_words = words;
        self
    }

    pub fn with_image_count(mut self, count: usize) -> Self {
        self.image_count = count;
        self
    }
}

/// A non-fatal problem recorded against a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWarning {
    pub phase: Phase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A fatal error recorded against a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub phase: Phase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// Normalizable unit of work, e.g. the article topic
    pub subject_key: String,
    /// Tenant / owner the job belongs to
    #[serde(default)]
    pub scope: String,
    pub target_config: TargetConfig,
    pub current_phase: Phase,
    pub completed_phases: BTreeSet<Phase>,
    pub phase_outputs: PhaseOutputs,
    #[serde(default)]
    pub warnings: Vec<JobWarning>,
    #[serde(default)]
    pub errors: Vec<JobFailure>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    /// Fresh state positioned at `Init`.
    pub fn new(scope: impl Into<String>, subject_key: impl Into<String>, target: TargetConfig) -> Self {
        let now = Utc::now();
        Self {
            subject_key: subject_key.into(),
            scope: scope.into(),
            target_config: target,
            current_phase: Phase::Init,
            completed_phases: BTreeSet::new(),
            phase_outputs: PhaseOutputs::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.current_phase = phase;
        self.touch();
    }

    /// Mark a phase complete without output. Idempotent.
    ///
    /// Keeps the output/completion invariant by storing a `Degraded`
    /// placeholder when the phase has no output yet.
    pub fn complete_phase(&mut self, phase: Phase) {
        if self.completed_phases.contains(&phase) {
            return;
        }
        self.phase_outputs
            .insert_if_absent(PhaseOutput::Degraded { phase });
        self.completed_phases.insert(phase);
        self.touch();
    }

    /// Store a phase's output and complete the phase.
    ///
    /// Returns `false` (and changes nothing) when the phase was already
    /// complete; a completed phase is never re-entered.
    pub fn record_output(&mut self, output: PhaseOutput) -> bool {
        let phase = output.phase();
        if self.completed_phases.contains(&phase) {
            return false;
        }
        self.phase_outputs.insert(output);
        self.completed_phases.insert(phase);
        self.touch();
        true
    }

    pub fn add_warning(&mut self, phase: Phase, message: impl Into<String>) {
        self.warnings.push(JobWarning {
            phase,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn add_error(&mut self, phase: Phase, message: impl Into<String>, stack: Option<String>) {
        self.errors.push(JobFailure {
            phase,
            message: message.into(),
            stack,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.set_phase(Phase::Completed);
    }

    /// Move to `Failed`, recording `error` against the phase that was
    /// running. Outputs are kept for diagnosis and manual resume.
    pub fn mark_failed(&mut self, error: Option<&(dyn std::error::Error + 'static)>) {
        if let Some(err) = error {
            let failed_in = self.current_phase;
            self.add_error(failed_in, err.to_string(), source_chain(err));
        }
        self.set_phase(Phase::Failed);
    }

    pub fn is_phase_completed(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// First pipeline phase (in total order) not yet completed.
    pub fn next_phase(&self) -> Option<Phase> {
        Phase::PIPELINE
            .into_iter()
            .find(|p| !self.completed_phases.contains(p))
    }

    /// True when at least one phase produced real (non-degraded) output.
    pub fn has_partial_output(&self) -> bool {
        self.phase_outputs.iter().any(|(_, o)| !o.is_degraded())
    }

    /// Reopen a FAILED job at its first incomplete phase.
    ///
    /// Completed phases, outputs and the error history are untouched.
    /// Returns the phase the job will resume from, or `None` when the job is
    /// not failed.
    pub fn reopen(&mut self) -> Option<Phase> {
        if self.current_phase != Phase::Failed {
            return None;
        }
        let resume_at = self.next_phase().unwrap_or(Phase::Completed);
        self.set_phase(resume_at);
        Some(resume_at)
    }

    /// Check the structural invariants. Used when loading a checkpoint.
    pub fn validate(&self) -> Result<(), String> {
        for phase in &self.completed_phases {
            if !self.phase_outputs.contains(*phase) {
                return Err(format!("phase {phase} completed without output"));
            }
        }
        for (phase, output) in self.phase_outputs.iter() {
            if !self.completed_phases.contains(phase) {
                return Err(format!("output present for incomplete phase {phase}"));
            }
            if output.phase() != *phase {
                return Err(format!(
                    "output keyed as {phase} belongs to {}",
                    output.phase()
                ));
            }
        }
        Ok(())
    }
}

/// Render an error's source chain, outermost cause first.
fn source_chain(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    if causes.is_empty() {
        None
    } else {
        Some(causes.join("\ncaused by: "))
    }
}
