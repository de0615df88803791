//! Versioned checkpoint/resume protocol.
//!
//! A checkpoint record is `{ version, state, savedAt }`, one per job id,
//! overwritten after every phase. At job start it is read once to decide
//! between resuming and a fresh start.
//!
//! A record whose version differs from [`CHECKPOINT_VERSION`] is treated as
//! absent: no cross-version migration is attempted.
//!
//! Store failures never abort a job. A failed save means the job continues
//! without durability for that step; a failed load means a fresh start.
//! Both are logged at `error` level.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{CheckpointError, CheckpointResult};
use crate::traits::store::CheckpointStore;
use crate::types::ids::JobId;
use crate::types::job_state::JobState;
use crate::types::phase::Phase;

/// Checkpoint format version understood by this engine.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable representation of a job's state.
///
/// `state` is kept as raw JSON so a record from another version can be
/// recognised and skipped without having to deserialize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub version: u32,
    pub state: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(state: &JobState) -> Result<Self, serde_json::Error> {
        Self::with_version(state, CHECKPOINT_VERSION)
    }

    pub fn with_version(state: &JobState, version: u32) -> Result<Self, serde_json::Error> {
        Ok(Self {
            version,
            state: serde_json::to_value(state)?,
            saved_at: Utc::now(),
        })
    }
}

/// Where a job should pick up.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Restored state; `None` means start fresh
    pub state: Option<JobState>,
    /// First incomplete phase; `None` for a fresh or terminal job
    pub resume_phase: Option<Phase>,
}

impl ResumePoint {
    fn fresh() -> Self {
        Self {
            state: None,
            resume_phase: None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.state.is_none()
    }

    /// The restored job is COMPLETED or FAILED and must not be restarted.
    pub fn is_terminal(&self) -> bool {
        self.state.as_ref().is_some_and(JobState::is_terminal)
    }
}

/// Checkpoint operations for one job.
pub struct CheckpointManager {
    job_id: JobId,
    store: Arc<dyn CheckpointStore>,
    version: u32,
}

impl CheckpointManager {
    pub fn new(job_id: JobId, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            job_id,
            store,
            version: CHECKPOINT_VERSION,
        }
    }

    /// Override the engine version (used to simulate upgrades).
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Full-overwrite upsert of the job's checkpoint.
    pub async fn save(&self, state: &JobState) -> CheckpointResult<()> {
        let record = CheckpointRecord::with_version(state, self.version)
            .map_err(|e| CheckpointError::Store(e.into()))?;
        self.store.write_checkpoint(self.job_id, &record).await?;
        debug!(
            job_id = %self.job_id,
            phase = %state.current_phase,
            completed = state.completed_phases.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Read and decode the checkpoint. A version mismatch reads as `None`.
    pub async fn load(&self) -> CheckpointResult<Option<JobState>> {
        let Some(record) = self.store.read_checkpoint(self.job_id).await? else {
            return Ok(None);
        };

        if record.version != self.version {
            info!(
                job_id = %self.job_id,
                found = record.version,
                expected = self.version,
                "checkpoint version mismatch, ignoring checkpoint"
            );
            return Ok(None);
        }

        let state: JobState =
            serde_json::from_value(record.state).map_err(|e| CheckpointError::Corrupt {
                job_id: self.job_id,
                reason: e.to_string(),
            })?;

        state.validate().map_err(|reason| CheckpointError::Corrupt {
            job_id: self.job_id,
            reason,
        })?;

        Ok(Some(state))
    }

    /// Decide resume-vs-fresh.
    ///
    /// Any load failure degrades to a fresh start. This favours availability:
    /// a transient store outage can cause work to be redone.
    pub async fn resume(&self) -> ResumePoint {
        let state = match self.load().await {
            Ok(Some(state)) => state,
            Ok(None) => return ResumePoint::fresh(),
            Err(e) => {
                error!(
                    job_id = %self.job_id,
                    error = %e,
                    "failed to load checkpoint, starting fresh"
                );
                return ResumePoint::fresh();
            }
        };

        let resume_phase = if state.is_terminal() {
            None
        } else {
            Some(state.next_phase().unwrap_or(Phase::Completed))
        };

        info!(
            job_id = %self.job_id,
            current = %state.current_phase,
            resume_phase = ?resume_phase,
            completed = state.completed_phases.len(),
            "checkpoint found"
        );

        ResumePoint {
            state: Some(state),
            resume_phase,
        }
    }

    /// Logically delete the checkpoint. Returns whether one was removed.
    pub async fn clear(&self) -> bool {
        match self.store.delete_checkpoint(self.job_id).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to clear checkpoint");
                false
            }
        }
    }

    /// Retention sweep: delete checkpoints older than `retention`.
    pub async fn sweep(store: &dyn CheckpointStore, retention: chrono::Duration) -> CheckpointResult<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = store.sweep_checkpoints(cutoff).await?;
        info!(removed, cutoff = %cutoff, "checkpoint retention sweep finished");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::job_state::TargetConfig;
    use crate::types::output::{PhaseOutput, ResearchOutput};

    fn state() -> JobState {
        JobState::new("tenant", "pour over", TargetConfig::default())
    }

    fn manager(store: &Arc<MemoryStore>, job_id: JobId) -> CheckpointManager {
        CheckpointManager::new(job_id, store.clone())
    }

    #[tokio::test]
    async fn test_no_checkpoint_is_fresh() {
        let store = Arc::new(MemoryStore::new());
        let point = manager(&store, JobId::new()).resume().await;
        assert!(point.is_fresh());
        assert_eq!(point.resume_phase, None);
    }

    #[tokio::test]
    async fn test_save_then_resume_at_first_gap() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let checkpoints = manager(&store, id);

        let mut s = state();
        s.record_output(PhaseOutput::Research(ResearchOutput::default()));
        checkpoints.save(&s).await.unwrap();

        let point = checkpoints.resume().await;
        assert_eq!(point.state.as_ref(), Some(&s));
        assert_eq!(point.resume_phase, Some(Phase::CompetitorAnalysis));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let checkpoints = manager(&store, id);

        let mut s = state();
        checkpoints.save(&s).await.unwrap();
        s.complete_phase(Phase::Research);
        checkpoints.save(&s).await.unwrap();

        assert_eq!(store.checkpoint_count(), 1);
        let loaded = checkpoints.load().await.unwrap().unwrap();
        assert!(loaded.is_phase_completed(Phase::Research));
    }

    #[tokio::test]
    async fn test_terminal_job_has_no_resume_phase() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let checkpoints = manager(&store, id);

        let mut s = state();
        s.mark_completed();
        checkpoints.save(&s).await.unwrap();
        let point = checkpoints.resume().await;
        assert!(point.is_terminal());
        assert_eq!(point.resume_phase, None);

        s.mark_failed(None);
        checkpoints.save(&s).await.unwrap();
        let point = checkpoints.resume().await;
        assert!(point.is_terminal());
        assert_eq!(point.resume_phase, None);
    }

    #[tokio::test]
    async fn test_all_phases_done_resumes_at_completed() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let checkpoints = manager(&store, id);

        let mut s = state();
        for phase in Phase::PIPELINE {
            s.complete_phase(phase);
        }
        checkpoints.save(&s).await.unwrap();
        assert_eq!(checkpoints.resume().await.resume_phase, Some(Phase::Completed));
    }

    #[tokio::test]
    async fn test_version_mismatch_behaves_like_absent() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();

        let old_engine = manager(&store, id).with_version(CHECKPOINT_VERSION + 1);
        let mut s = state();
        s.complete_phase(Phase::Research);
        old_engine.save(&s).await.unwrap();

        let current = manager(&store, id);
        assert!(current.load().await.unwrap().is_none());
        let point = current.resume().await;
        assert_eq!(point, manager(&store, JobId::new()).resume().await);
        assert!(point.is_fresh());
    }

    #[tokio::test]
    async fn test_previous_version_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let record = CheckpointRecord::with_version(&state(), CHECKPOINT_VERSION.wrapping_sub(1)).unwrap();
        store.write_checkpoint(id, &record).await.unwrap();

        assert!(manager(&store, id).resume().await.is_fresh());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported_and_resume_degrades() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let record = CheckpointRecord {
            version: CHECKPOINT_VERSION,
            state: serde_json::json!({"subjectKey": 42}),
            saved_at: Utc::now(),
        };
        store.write_checkpoint(id, &record).await.unwrap();

        let checkpoints = manager(&store, id);
        assert!(matches!(
            checkpoints.load().await,
            Err(CheckpointError::Corrupt { .. })
        ));
        assert!(checkpoints.resume().await.is_fresh());
    }

    #[tokio::test]
    async fn test_invariant_violation_is_corrupt() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let mut s = state();
        s.completed_phases.insert(Phase::Writing);
        let record = CheckpointRecord::new(&s).unwrap();
        store.write_checkpoint(id, &record).await.unwrap();

        assert!(matches!(
            manager(&store, id).load().await,
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = Arc::new(MemoryStore::new());
        let id = JobId::new();
        let checkpoints = manager(&store, id);
        checkpoints.save(&state()).await.unwrap();

        assert!(checkpoints.clear().await);
        assert!(!checkpoints.clear().await);
        assert!(checkpoints.resume().await.is_fresh());
    }

    #[tokio::test]
    async fn test_sweep_removes_old_records() {
        let store = Arc::new(MemoryStore::new());
        let old = JobId::new();
        let mut record = CheckpointRecord::new(&state()).unwrap();
        record.saved_at = Utc::now() - chrono::Duration::days(30);
        store.write_checkpoint(old, &record).await.unwrap();
        manager(&store, JobId::new()).save(&state()).await.unwrap();

        let removed = CheckpointManager::sweep(store.as_ref(), chrono::Duration::days(14))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.checkpoint_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_with_unbounded_retention_keeps_everything() {
        let store = Arc::new(MemoryStore::new());
        let mut record = CheckpointRecord::new(&state()).unwrap();
        record.saved_at = Utc::now() - chrono::Duration::days(3_650);
        store.write_checkpoint(JobId::new(), &record).await.unwrap();

        let removed = CheckpointManager::sweep(store.as_ref(), chrono::TimeDelta::MAX)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.checkpoint_count(), 1);
    }
}
