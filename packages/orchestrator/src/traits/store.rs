//! Durable-store seams.
//!
//! The engine does not mandate a persistence engine. It talks to storage
//! through focused traits:
//! - `CheckpointStore`: one overwrite-only checkpoint record per job
//! - `SubmissionLedger`: job records and completed work, for duplicate checks
//! - `ResultSink`: final assembled results
//! - `LinkSource`: internal link candidates for enrichment
//! - `EngineStore`: composite of all four

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointRecord;
use crate::error::StoreResult;
use crate::links::LinkCandidate;
use crate::types::ids::JobId;
use crate::types::result::JobResult;

/// Storage for checkpoint records.
///
/// Writes are full overwrites, never deltas.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn read_checkpoint(&self, job_id: JobId) -> StoreResult<Option<CheckpointRecord>>;

    async fn write_checkpoint(&self, job_id: JobId, record: &CheckpointRecord) -> StoreResult<()>;

    /// Returns whether a record existed.
    async fn delete_checkpoint(&self, job_id: JobId) -> StoreResult<bool>;

    /// Delete records saved before `saved_before`. Returns how many went.
    async fn sweep_checkpoints(&self, saved_before: DateTime<Utc>) -> StoreResult<usize>;
}

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// A submitted job as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub scope: String,
    pub subject: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: JobId, scope: impl Into<String>, subject: impl Into<String>, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            scope: scope.into(),
            subject: subject.into(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human-readable locator for conflict messages.
    pub fn locator(&self) -> String {
        format!("job:{}", self.job_id)
    }
}

/// A finished unit of work (e.g. a published article).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWork {
    pub job_id: JobId,
    pub scope: String,
    pub subject: String,
    pub locator: String,
    #[serde(default)]
    pub title: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job records and completed work, scoped by tenant.
#[async_trait]
pub trait SubmissionLedger: Send + Sync {
    /// Completed work in `scope` finished at or after `since`.
    async fn completed_since(&self, scope: &str, since: DateTime<Utc>) -> StoreResult<Vec<CompletedWork>>;

    /// Job records in `scope` created at or after `since`, any status.
    async fn jobs_since(&self, scope: &str, since: DateTime<Utc>) -> StoreResult<Vec<JobRecord>>;

    /// Insert or replace a job record by id.
    async fn upsert_job(&self, record: &JobRecord) -> StoreResult<()>;

    async fn record_completed(&self, work: &CompletedWork) -> StoreResult<()>;
}

/// Destination for final job results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist_result(&self, result: &JobResult) -> StoreResult<()>;
}

/// Source of internal link candidates.
#[async_trait]
pub trait LinkSource: Send + Sync {
    /// Up to `limit` candidates in `scope`, excluding the job's own subject.
    async fn internal_candidates(
        &self,
        scope: &str,
        exclude_subject: &str,
        limit: usize,
    ) -> StoreResult<Vec<LinkCandidate>>;
}

/// Composite storage trait used by the orchestrator.
pub trait EngineStore: CheckpointStore + SubmissionLedger + ResultSink + LinkSource {}

// Blanket implementation: anything implementing all four is an EngineStore
impl<T: CheckpointStore + SubmissionLedger + ResultSink + LinkSource> EngineStore for T {}

impl From<&CompletedWork> for LinkCandidate {
    fn from(work: &CompletedWork) -> Self {
        let title = work.title.clone().unwrap_or_else(|| work.subject.clone());
        let mut anchors = vec![title.clone()];
        if !work.subject.eq_ignore_ascii_case(&title) {
            anchors.push(work.subject.clone());
        }
        LinkCandidate::new(work.locator.clone(), title).with_anchors(anchors)
    }
}

/// Most recent completed work first, excluding `exclude_subject`.
pub(crate) fn candidates_from_work(
    mut work: Vec<CompletedWork>,
    exclude_subject: &str,
    limit: usize,
) -> Vec<LinkCandidate> {
    let excluded = crate::guard::normalize_subject(exclude_subject);
    work.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    work.iter()
        .filter(|w| crate::guard::normalize_subject(&w.subject) != excluded)
        .take(limit)
        .map(LinkCandidate::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(subject: &str, title: Option<&str>, age_days: i64) -> CompletedWork {
        CompletedWork {
            job_id: JobId::new(),
            scope: "t".into(),
            subject: subject.into(),
            locator: format!("https://blog.example/{}", subject.replace(' ', "-")),
            title: title.map(str::to_string),
            completed_at: Utc::now() - chrono::Duration::days(age_days),
        }
    }

    #[test]
    fn test_candidate_from_work_uses_title_and_subject() {
        let candidate = LinkCandidate::from(&work("grinders", Some("Best Burr Grinders"), 0));
        assert_eq!(candidate.title, "Best Burr Grinders");
        assert_eq!(candidate.anchors, vec!["Best Burr Grinders", "grinders"]);
    }

    #[test]
    fn test_candidates_exclude_own_subject_and_sort_newest_first() {
        let all = vec![
            work("old topic", None, 10),
            work("Best Coffee Makers", None, 1),
            work("new topic", None, 0),
        ];
        let candidates = candidates_from_work(all, "best coffee-makers", 5);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "new topic");
        assert_eq!(candidates[1].title, "old topic");
    }

    #[test]
    fn test_in_flight_statuses() {
        assert!(JobStatus::Pending.is_in_flight());
        assert!(JobStatus::Processing.is_in_flight());
        assert!(!JobStatus::Completed.is_in_flight());
        assert!(!JobStatus::Failed.is_in_flight());
    }

    #[test]
    fn test_status_names_match_serde() {
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }
}
