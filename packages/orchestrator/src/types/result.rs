//! Assembled result of a finished job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::links::LinkStats;
use crate::traits::store::CompletedWork;
use crate::types::ids::JobId;
use crate::types::job_state::{JobState, JobWarning};
use crate::types::output::{GeneratedImage, MetaOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub scope: String,
    pub subject: String,
    pub title: Option<String>,
    pub html: Option<String>,
    pub meta: Option<MetaOutput>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub images: Vec<GeneratedImage>,
    /// Where the published artifact lives
    pub locator: Option<String>,
    pub link_stats: Option<LinkStats>,
    #[serde(default)]
    pub warnings: Vec<JobWarning>,
    pub completed_at: DateTime<Utc>,
    /// True when this result was rebuilt from earlier work instead of
    /// produced by running the pipeline
    #[serde(default)]
    pub reused: bool,
}

impl JobResult {
    /// Assemble from a finished job's state.
    pub fn from_state(job_id: JobId, state: &JobState) -> Self {
        let outputs = &state.phase_outputs;
        Self {
            job_id,
            scope: state.scope.clone(),
            subject: state.subject_key.clone(),
            title: outputs.writing().map(|w| w.title.clone()),
            html: outputs.final_html().map(str::to_string),
            meta: outputs.meta().cloned(),
            categories: outputs
                .categories()
                .map(|c| c.categories.clone())
                .unwrap_or_default(),
            images: outputs
                .images()
                .map(|i| i.images.clone())
                .unwrap_or_default(),
            locator: outputs.publish().map(|p| p.locator.clone()),
            link_stats: outputs.link_enrichment().map(|l| l.stats.clone()),
            warnings: state.warnings.clone(),
            completed_at: state.updated_at,
            reused: false,
        }
    }

    /// Rebuild from a completed-work record found by the duplicate guard.
    pub fn from_completed_work(work: &CompletedWork) -> Self {
        Self {
            job_id: work.job_id,
            scope: work.scope.clone(),
            subject: work.subject.clone(),
            title: work.title.clone(),
            html: None,
            meta: None,
            categories: vec![],
            images: vec![],
            locator: Some(work.locator.clone()),
            link_stats: None,
            warnings: vec![],
            completed_at: work.completed_at,
            reused: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job_state::TargetConfig;
    use crate::types::output::{PhaseOutput, PublishOutput, WritingOutput};

    #[test]
    fn test_from_state_collects_outputs() {
        let mut state = JobState::new("t", "espresso", TargetConfig::default());
        state.record_output(PhaseOutput::Writing(WritingOutput {
            title: "Espresso".into(),
            html: "<p>x</p>".into(),
            word_count: 1,
        }));
        state.record_output(PhaseOutput::Publish(PublishOutput {
            locator: "https://blog.example/espresso".into(),
            published_at: Utc::now(),
        }));
        state.add_warning(crate::types::phase::Phase::Image, "no images");

        let id = JobId::new();
        let result = JobResult::from_state(id, &state);
        assert_eq!(result.job_id, id);
        assert_eq!(result.title.as_deref(), Some("Espresso"));
        assert_eq!(result.html.as_deref(), Some("<p>x</p>"));
        assert_eq!(result.locator.as_deref(), Some("https://blog.example/espresso"));
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.reused);
    }
}
