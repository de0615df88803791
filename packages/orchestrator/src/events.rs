//! Job lifecycle events.

use serde::{Deserialize, Serialize};

use crate::types::ids::JobId;
use crate::types::phase::Phase;

/// Facts about a job's lifecycle, published on the orchestrator's
/// broadcast channel. Subscribers are optional; nothing waits on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A fresh job state was initialized.
    Started { job_id: JobId, subject: String },

    /// A checkpoint was found and the job continues from `from_phase`.
    Resumed { job_id: JobId, from_phase: Phase, completed: usize },

    PhaseStarted { job_id: JobId, phase: Phase },

    PhaseCompleted { job_id: JobId, phase: Phase, attempts: u32 },

    /// An optional phase failed and the pipeline continued without it.
    PhaseDegraded { job_id: JobId, phase: Phase, reason: String },

    /// A required phase failed; the job is about to be marked FAILED.
    PhaseFailed {
        job_id: JobId,
        phase: Phase,
        error: String,
        attempts: u32,
    },

    /// A checkpoint save failed; the job continues without durability.
    CheckpointFailed { job_id: JobId, phase: Phase, error: String },

    Completed { job_id: JobId, duration_ms: u64 },

    Failed { job_id: JobId, phase: Phase, error: String },

    /// The duplicate guard matched earlier or running work.
    DuplicateDetected {
        job_id: JobId,
        locator: String,
        in_flight: bool,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Resumed { job_id, .. }
            | JobEvent::PhaseStarted { job_id, .. }
            | JobEvent::PhaseCompleted { job_id, .. }
            | JobEvent::PhaseDegraded { job_id, .. }
            | JobEvent::PhaseFailed { job_id, .. }
            | JobEvent::CheckpointFailed { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::DuplicateDetected { job_id, .. } => *job_id,
        }
    }
}
