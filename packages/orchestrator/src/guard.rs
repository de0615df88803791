//! Duplicate-submission guard.
//!
//! Before new work starts, looks for an equivalent job (same scope, same
//! normalized subject) inside a trailing window, first among completed work
//! and then among in-flight job records.
//!
//! A ledger failure degrades to "no duplicate" with a warning. Forward
//! progress wins over strict dedup; an occasional duplicate costs less than
//! blocking every submission during a store outage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::traits::store::{CompletedWork, SubmissionLedger};
use crate::types::config::GuardConfig;
use crate::types::ids::JobId;

/// Case-fold and keep only alphanumeric characters.
///
/// `"Best Coffee Makers"` and `" best   coffee-makers "` both become
/// `"bestcoffeemakers"`.
pub fn normalize_subject(subject: &str) -> String {
    subject
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateCheck {
    NoDuplicate,
    /// Equivalent work already finished
    Completed { locator: String, work: CompletedWork },
    /// Equivalent job is pending or processing
    InFlight { locator: String, job_id: JobId },
}

impl DuplicateCheck {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, DuplicateCheck::NoDuplicate)
    }
}

pub struct DuplicateGuard {
    ledger: Arc<dyn SubmissionLedger>,
    config: GuardConfig,
}

impl DuplicateGuard {
    pub fn new(ledger: Arc<dyn SubmissionLedger>, config: GuardConfig) -> Self {
        Self { ledger, config }
    }

    /// Check `subject` in `scope`. `own_job` is excluded from the in-flight
    /// search so a job resubmitted after a crash does not conflict with its
    /// own stale record. Its completed work still counts.
    pub async fn check(&self, scope: &str, subject: &str, own_job: Option<JobId>) -> DuplicateCheck {
        if !self.config.enabled {
            return DuplicateCheck::NoDuplicate;
        }

        let key = normalize_subject(subject);
        if key.is_empty() {
            warn!(scope, subject, "subject normalizes to nothing, skipping duplicate check");
            return DuplicateCheck::NoDuplicate;
        }

        let since = Utc::now()
            .checked_sub_signed(self.config.window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.ledger.completed_since(scope, since).await {
            Ok(work) => {
                let newest = work
                    .into_iter()
                    .filter(|w| normalize_subject(&w.subject) == key)
                    .max_by_key(|w| w.completed_at);
                if let Some(work) = newest {
                    debug!(scope, key = %key, locator = %work.locator, "completed duplicate found");
                    return DuplicateCheck::Completed {
                        locator: work.locator.clone(),
                        work,
                    };
                }
            }
            Err(e) => {
                warn!(scope, error = %e, "duplicate check failed on completed work, proceeding");
                return DuplicateCheck::NoDuplicate;
            }
        }

        match self.ledger.jobs_since(scope, since).await {
            Ok(jobs) => {
                let in_flight = jobs.into_iter().find(|j| {
                    j.status.is_in_flight()
                        && Some(j.job_id) != own_job
                        && normalize_subject(&j.subject) == key
                });
                if let Some(job) = in_flight {
                    debug!(scope, key = %key, job_id = %job.job_id, "in-flight duplicate found");
                    return DuplicateCheck::InFlight {
                        locator: job.locator(),
                        job_id: job.job_id,
                    };
                }
            }
            Err(e) => {
                warn!(scope, error = %e, "duplicate check failed on job records, proceeding");
            }
        }

        DuplicateCheck::NoDuplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::traits::store::{JobRecord, JobStatus};

    fn guard(store: &Arc<MemoryStore>) -> DuplicateGuard {
        DuplicateGuard::new(store.clone(), GuardConfig::default())
    }

    fn completed(scope: &str, subject: &str, age_days: i64) -> CompletedWork {
        CompletedWork {
            job_id: JobId::new(),
            scope: scope.into(),
            subject: subject.into(),
            locator: "https://blog.example/coffee".into(),
            title: Some("Coffee".into()),
            completed_at: Utc::now() - chrono::Duration::days(age_days),
        }
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Best Coffee Makers"), "bestcoffeemakers");
        assert_eq!(normalize_subject(" best   coffee-makers "), "bestcoffeemakers");
        assert_eq!(normalize_subject("Café Crème!"), "cafécrème");
        assert_eq!(normalize_subject(" -- "), "");
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_after_normalization() {
        let store = Arc::new(MemoryStore::new());
        let first = JobId::new();
        store
            .upsert_job(&JobRecord::new(first, "t", "Best Coffee Makers", JobStatus::Processing))
            .await
            .unwrap();

        let check = guard(&store).check("t", " best   coffee-makers ", None).await;
        assert_eq!(
            check,
            DuplicateCheck::InFlight {
                locator: format!("job:{first}"),
                job_id: first
            }
        );
    }

    #[tokio::test]
    async fn test_completed_duplicate_wins_over_in_flight() {
        let store = Arc::new(MemoryStore::new());
        store.record_completed(&completed("t", "best coffee makers", 3)).await.unwrap();
        store
            .upsert_job(&JobRecord::new(JobId::new(), "t", "best coffee makers", JobStatus::Pending))
            .await
            .unwrap();

        let check = guard(&store).check("t", "Best Coffee Makers", None).await;
        assert!(matches!(check, DuplicateCheck::Completed { ref locator, .. } if locator == "https://blog.example/coffee"));
    }

    #[tokio::test]
    async fn test_outside_window_or_other_scope_is_not_duplicate() {
        let store = Arc::new(MemoryStore::new());
        store.record_completed(&completed("t", "coffee", 45)).await.unwrap();
        store.record_completed(&completed("other", "coffee", 1)).await.unwrap();

        assert_eq!(guard(&store).check("t", "coffee", None).await, DuplicateCheck::NoDuplicate);
    }

    #[tokio::test]
    async fn test_huge_window_reaches_back_to_the_beginning() {
        let store = Arc::new(MemoryStore::new());
        store.record_completed(&completed("t", "coffee", 3_650)).await.unwrap();

        let guard = DuplicateGuard::new(
            store.clone(),
            GuardConfig {
                enabled: true,
                window_days: 100_000_000,
            },
        );
        assert!(matches!(guard.check("t", "coffee", None).await, DuplicateCheck::Completed { .. }));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_not_in_flight() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_job(&JobRecord::new(JobId::new(), "t", "coffee", JobStatus::Failed))
            .await
            .unwrap();

        assert!(!guard(&store).check("t", "coffee", None).await.is_duplicate());
    }

    #[tokio::test]
    async fn test_own_job_is_excluded() {
        let store = Arc::new(MemoryStore::new());
        let own = JobId::new();
        store
            .upsert_job(&JobRecord::new(own, "t", "coffee", JobStatus::Processing))
            .await
            .unwrap();

        assert!(!guard(&store).check("t", "coffee", Some(own)).await.is_duplicate());
    }

    #[tokio::test]
    async fn test_own_completed_work_still_counts() {
        let store = Arc::new(MemoryStore::new());
        let work = completed("t", "coffee", 1);
        let own = work.job_id;
        store.record_completed(&work).await.unwrap();

        assert!(matches!(
            guard(&store).check("t", "coffee", Some(own)).await,
            DuplicateCheck::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_ledger_failure_degrades_to_no_duplicate() {
        let store = Arc::new(MemoryStore::new());
        store.record_completed(&completed("t", "coffee", 1)).await.unwrap();
        store.set_unavailable(true);

        assert_eq!(guard(&store).check("t", "coffee", None).await, DuplicateCheck::NoDuplicate);
    }

    #[tokio::test]
    async fn test_disabled_guard() {
        let store = Arc::new(MemoryStore::new());
        store.record_completed(&completed("t", "coffee", 1)).await.unwrap();
        let guard = DuplicateGuard::new(
            store.clone(),
            GuardConfig {
                enabled: false,
                ..GuardConfig::default()
            },
        );
        assert!(!guard.check("t", "coffee", None).await.is_duplicate());
    }
}
