//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::checkpoint::CheckpointRecord;
use crate::error::{StoreError, StoreResult};
use crate::links::LinkCandidate;
use crate::traits::store::{
    candidates_from_work, CheckpointStore, CompletedWork, JobRecord, LinkSource, ResultSink,
    SubmissionLedger,
};
use crate::types::ids::JobId;
use crate::types::result::JobResult;

/// In-memory storage for checkpoints, ledger records and results.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart. Failure injection switches let tests
/// exercise the degraded paths.
pub struct MemoryStore {
    checkpoints: RwLock<HashMap<JobId, CheckpointRecord>>,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    completed: RwLock<Vec<CompletedWork>>,
    results: RwLock<HashMap<JobId, JobResult>>,
    unavailable: AtomicBool,
    fail_checkpoint_writes: AtomicBool,
    fail_result_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            completed: RwLock::new(Vec::new()),
            results: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            fail_checkpoint_writes: AtomicBool::new(false),
            fail_result_writes: AtomicBool::new(false),
        }
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make checkpoint writes fail while reads keep working.
    pub fn set_fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoint_writes.store(fail, Ordering::SeqCst);
    }

    /// Make result persistence fail.
    pub fn set_fail_result_writes(&self, fail: bool) {
        self.fail_result_writes.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    /// Get the number of stored checkpoints.
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Raw checkpoint record, bypassing version checks.
    pub fn checkpoint(&self, job_id: JobId) -> Option<CheckpointRecord> {
        self.checkpoints
            .read()
            .ok()
            .and_then(|c| c.get(&job_id).cloned())
    }

    pub fn job(&self, job_id: JobId) -> Option<JobRecord> {
        self.jobs.read().ok().and_then(|j| j.get(&job_id).cloned())
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn result(&self, job_id: JobId) -> Option<JobResult> {
        self.results
            .read()
            .ok()
            .and_then(|r| r.get(&job_id).cloned())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn read_checkpoint(&self, job_id: JobId) -> StoreResult<Option<CheckpointRecord>> {
        self.check_available()?;
        Ok(read(&self.checkpoints)?.get(&job_id).cloned())
    }

    async fn write_checkpoint(&self, job_id: JobId, record: &CheckpointRecord) -> StoreResult<()> {
        self.check_available()?;
        if self.fail_checkpoint_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("checkpoint writes disabled".into()));
        }
        write(&self.checkpoints)?.insert(job_id, record.clone());
        Ok(())
    }

    async fn delete_checkpoint(&self, job_id: JobId) -> StoreResult<bool> {
        self.check_available()?;
        Ok(write(&self.checkpoints)?.remove(&job_id).is_some())
    }

    async fn sweep_checkpoints(&self, saved_before: DateTime<Utc>) -> StoreResult<usize> {
        self.check_available()?;
        let mut checkpoints = write(&self.checkpoints)?;
        let before = checkpoints.len();
        checkpoints.retain(|_, record| record.saved_at >= saved_before);
        Ok(before - checkpoints.len())
    }
}

#[async_trait]
impl SubmissionLedger for MemoryStore {
    async fn completed_since(&self, scope: &str, since: DateTime<Utc>) -> StoreResult<Vec<CompletedWork>> {
        self.check_available()?;
        Ok(read(&self.completed)?
            .iter()
            .filter(|w| w.scope == scope && w.completed_at >= since)
            .cloned()
            .collect())
    }

    async fn jobs_since(&self, scope: &str, since: DateTime<Utc>) -> StoreResult<Vec<JobRecord>> {
        self.check_available()?;
        Ok(read(&self.jobs)?
            .values()
            .filter(|j| j.scope == scope && j.created_at >= since)
            .cloned()
            .collect())
    }

    async fn upsert_job(&self, record: &JobRecord) -> StoreResult<()> {
        self.check_available()?;
        write(&self.jobs)?.insert(record.job_id, record.clone());
        Ok(())
    }

    async fn record_completed(&self, work: &CompletedWork) -> StoreResult<()> {
        self.check_available()?;
        let mut completed = write(&self.completed)?;
        completed.retain(|w| w.job_id != work.job_id);
        completed.push(work.clone());
        Ok(())
    }
}

#[async_trait]
impl ResultSink for MemoryStore {
    async fn persist_result(&self, result: &JobResult) -> StoreResult<()> {
        self.check_available()?;
        if self.fail_result_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("result writes disabled".into()));
        }
        write(&self.results)?.insert(result.job_id, result.clone());
        Ok(())
    }
}

#[async_trait]
impl LinkSource for MemoryStore {
    async fn internal_candidates(
        &self,
        scope: &str,
        exclude_subject: &str,
        limit: usize,
    ) -> StoreResult<Vec<LinkCandidate>> {
        self.check_available()?;
        let work: Vec<CompletedWork> = read(&self.completed)?
            .iter()
            .filter(|w| w.scope == scope)
            .cloned()
            .collect();
        Ok(candidates_from_work(work, exclude_subject, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::store::JobStatus;
    use crate::types::job_state::{JobState, TargetConfig};

    fn record() -> CheckpointRecord {
        CheckpointRecord::new(&JobState::new("t", "s", TargetConfig::default())).unwrap()
    }

    #[tokio::test]
    async fn test_checkpoint_crud() {
        let store = MemoryStore::new();
        let id = JobId::new();

        store.write_checkpoint(id, &record()).await.unwrap();
        assert_eq!(store.checkpoint_count(), 1);
        assert!(store.read_checkpoint(id).await.unwrap().is_some());

        assert!(store.delete_checkpoint(id).await.unwrap());
        assert!(store.read_checkpoint(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_job_replaces_by_id() {
        let store = MemoryStore::new();
        let id = JobId::new();
        let mut job = JobRecord::new(id, "t", "coffee", JobStatus::Processing);
        store.upsert_job(&job).await.unwrap();
        job.status = JobStatus::Completed;
        store.upsert_job(&job).await.unwrap();

        let since = Utc::now() - chrono::Duration::days(1);
        let jobs = store.jobs_since("t", since).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(store.job(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unavailable_fails_everything() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.read_checkpoint(JobId::new()).await.is_err());
        assert!(store.jobs_since("t", Utc::now()).await.is_err());

        store.set_unavailable(false);
        assert!(store.read_checkpoint(JobId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_internal_candidates_scoped() {
        let store = MemoryStore::new();
        for (scope, subject) in [("t", "grinders"), ("t", "kettles"), ("x", "mugs")] {
            store
                .record_completed(&CompletedWork {
                    job_id: JobId::new(),
                    scope: scope.into(),
                    subject: subject.into(),
                    locator: format!("https://blog.example/{subject}"),
                    title: None,
                    completed_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let candidates = store.internal_candidates("t", "kettles", 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://blog.example/grinders");
    }
}
