//! Step-worker contract.
//!
//! A step worker produces one phase's output. The orchestrator only
//! observes success or failure; any side effects a worker has (uploads,
//! remote writes) are its own business.

use async_trait::async_trait;

use crate::error::StepResult;
use crate::types::ids::JobId;
use crate::types::job_state::TargetConfig;
use crate::types::output::{PhaseOutput, PhaseOutputs};
use crate::types::phase::Phase;

/// Everything a worker may read. Passed explicitly on every call.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub job_id: JobId,
    pub phase: Phase,
    pub scope: &'a str,
    pub subject: &'a str,
    pub target: &'a TargetConfig,
    /// Outputs of every phase completed so far
    pub outputs: &'a PhaseOutputs,
    /// 1-based attempt number within the retry loop
    pub attempt: u32,
}

/// Produces the output of a single phase.
///
/// Implementations should return a typed `StepError` so the retry layer
/// can classify it. The returned output must belong to `phase()`.
#[async_trait]
pub trait StepWorker: Send + Sync {
    fn phase(&self) -> Phase;

    async fn execute(&self, input: StepInput<'_>) -> StepResult<PhaseOutput>;
}
