//! Pipeline phases and their ordering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step of the job pipeline.
///
/// Declaration order is the total order used to find the next unfinished
/// phase. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Research,
    CompetitorAnalysis,
    Strategy,
    ContentPlan,
    Image,
    Writing,
    LinkEnrichment,
    Meta,
    Category,
    Publish,
    Completed,
    Failed,
}

/// Whether a phase's failure aborts the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure propagates and marks the job FAILED
    #[default]
    Required,
    /// Failure becomes a warning and the pipeline proceeds degraded
    Optional,
}

impl Phase {
    /// Every phase in total order.
    pub const ALL: [Phase; 13] = [
        Phase::Init,
        Phase::Research,
        Phase::CompetitorAnalysis,
        Phase::Strategy,
        Phase::ContentPlan,
        Phase::Image,
        Phase::Writing,
        Phase::LinkEnrichment,
        Phase::Meta,
        Phase::Category,
        Phase::Publish,
        Phase::Completed,
        Phase::Failed,
    ];

    /// The phases that do work, in execution order.
    pub const PIPELINE: [Phase; 10] = [
        Phase::Research,
        Phase::CompetitorAnalysis,
        Phase::Strategy,
        Phase::ContentPlan,
        Phase::Image,
        Phase::Writing,
        Phase::LinkEnrichment,
        Phase::Meta,
        Phase::Category,
        Phase::Publish,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// True for phases that invoke a step worker.
    pub fn is_work(self) -> bool {
        !matches!(self, Phase::Init | Phase::Completed | Phase::Failed)
    }

    /// Built-in criticality. `EngineConfig` may override it per phase.
    pub fn default_criticality(self) -> Criticality {
        match self {
            Phase::CompetitorAnalysis | Phase::Image | Phase::LinkEnrichment | Phase::Category => {
                Criticality::Optional
            }
            _ => Criticality::Required,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Research => "research",
            Phase::CompetitorAnalysis => "competitor_analysis",
            Phase::Strategy => "strategy",
            Phase::ContentPlan => "content_plan",
            Phase::Image => "image",
            Phase::Writing => "writing",
            Phase::LinkEnrichment => "link_enrichment",
            Phase::Meta => "meta",
            Phase::Category => "category",
            Phase::Publish => "publish",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order_follows_declaration() {
        assert!(Phase::Init < Phase::Research);
        assert!(Phase::Writing < Phase::LinkEnrichment);
        assert!(Phase::Publish < Phase::Completed);

        let mut sorted = Phase::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Phase::ALL.to_vec());
    }

    #[test]
    fn test_pipeline_excludes_bookends() {
        assert!(Phase::PIPELINE.iter().all(|p| p.is_work()));
        assert!(!Phase::PIPELINE.contains(&Phase::Init));
        assert!(!Phase::PIPELINE.iter().any(|p| p.is_terminal()));
    }

    #[test]
    fn test_default_criticality() {
        assert_eq!(Phase::Research.default_criticality(), Criticality::Required);
        assert_eq!(Phase::Strategy.default_criticality(), Criticality::Required);
        assert_eq!(Phase::Writing.default_criticality(), Criticality::Required);
        assert_eq!(Phase::Meta.default_criticality(), Criticality::Required);
        assert_eq!(Phase::CompetitorAnalysis.default_criticality(), Criticality::Optional);
        assert_eq!(Phase::LinkEnrichment.default_criticality(), Criticality::Optional);
    }

    #[test]
    fn test_parse() {
        assert_eq!("link-enrichment".parse::<Phase>().unwrap(), Phase::LinkEnrichment);
        assert_eq!("META".parse::<Phase>().unwrap(), Phase::Meta);
        assert!("nope".parse::<Phase>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Phase::CompetitorAnalysis).unwrap();
        assert_eq!(json, "\"competitor_analysis\"");
    }
}
