//! Per-phase output payloads.
//!
//! Each phase produces its own statically typed payload. `PhaseOutput` is the
//! sum type stored in the job state, keyed by the phase that produced it, so
//! consumers never downcast an opaque blob.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StepError, StepResult};
use crate::links::{InsertedLink, LinkStats};
use crate::types::phase::Phase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResearchOutput {
    pub summary: String,
    #[serde(default)]
    pub sources: Vec<ResearchSource>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorPage {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompetitorOutput {
    pub competitors: Vec<CompetitorPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrategyOutput {
    pub angle: String,
    pub primary_keyword: String,
    #[serde(default)]
    pub secondary_keywords: Vec<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSection {
    pub heading: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub target_words: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContentPlanOutput {
    pub sections: Vec<PlannedSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Featured,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub alt: String,
    pub role: ImageRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImageOutput {
    pub images: Vec<GeneratedImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WritingOutput {
    pub title: String,
    /// Article body as HTML
    pub html: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LinkEnrichmentOutput {
    /// Article body with links woven in
    pub html: String,
    pub stats: LinkStats,
    #[serde(default)]
    pub links: Vec<InsertedLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetaOutput {
    pub meta_title: String,
    pub meta_description: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CategoryOutput {
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutput {
    /// Where the published artifact lives (URL or remote id)
    pub locator: String,
    pub published_at: DateTime<Utc>,
}

/// Output of a completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PhaseOutput {
    Research(ResearchOutput),
    CompetitorAnalysis(CompetitorOutput),
    Strategy(StrategyOutput),
    ContentPlan(ContentPlanOutput),
    Image(ImageOutput),
    Writing(WritingOutput),
    LinkEnrichment(LinkEnrichmentOutput),
    Meta(MetaOutput),
    Category(CategoryOutput),
    Publish(PublishOutput),
    /// An optional phase that completed without producing output.
    Degraded { phase: Phase },
}

impl PhaseOutput {
    /// The phase this payload belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            PhaseOutput::Research(_) => Phase::Research,
            PhaseOutput::CompetitorAnalysis(_) => Phase::CompetitorAnalysis,
            PhaseOutput::Strategy(_) => Phase::Strategy,
            PhaseOutput::ContentPlan(_) => Phase::ContentPlan,
            PhaseOutput::Image(_) => Phase::Image,
            PhaseOutput::Writing(_) => Phase::Writing,
            PhaseOutput::LinkEnrichment(_) => Phase::LinkEnrichment,
            PhaseOutput::Meta(_) => Phase::Meta,
            PhaseOutput::Category(_) => Phase::Category,
            PhaseOutput::Publish(_) => Phase::Publish,
            PhaseOutput::Degraded { phase } => *phase,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PhaseOutput::Degraded { .. })
    }
}

/// Outputs of completed phases, keyed by phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseOutputs(BTreeMap<Phase, PhaseOutput>);

macro_rules! typed_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<&$ty> {
            match self.0.get(&Phase::$variant)? {
                PhaseOutput::$variant(output) => Some(output),
                _ => None,
            }
        }
    };
}

impl PhaseOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phase: Phase) -> Option<&PhaseOutput> {
        self.0.get(&phase)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.0.contains_key(&phase)
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Phase, &PhaseOutput)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert keyed by the payload's own phase. Returns the previous value.
    pub(crate) fn insert(&mut self, output: PhaseOutput) -> Option<PhaseOutput> {
        self.0.insert(output.phase(), output)
    }

    pub(crate) fn insert_if_absent(&mut self, output: PhaseOutput) {
        self.0.entry(output.phase()).or_insert(output);
    }

    typed_accessor!(research, Research, ResearchOutput);
    typed_accessor!(competitors, CompetitorAnalysis, CompetitorOutput);
    typed_accessor!(strategy, Strategy, StrategyOutput);
    typed_accessor!(content_plan, ContentPlan, ContentPlanOutput);
    typed_accessor!(images, Image, ImageOutput);
    typed_accessor!(writing, Writing, WritingOutput);
    typed_accessor!(link_enrichment, LinkEnrichment, LinkEnrichmentOutput);
    typed_accessor!(meta, Meta, MetaOutput);
    typed_accessor!(categories, Category, CategoryOutput);
    typed_accessor!(publish, Publish, PublishOutput);

    /// The most refined article body available: linked markup when link
    /// enrichment produced it, otherwise the raw writing output.
    pub fn final_html(&self) -> Option<&str> {
        self.link_enrichment()
            .map(|l| l.html.as_str())
            .or_else(|| self.writing().map(|w| w.html.as_str()))
    }
}

/// Turn an absent upstream output into a terminal `MissingInput` error.
pub fn require<T>(phase: Phase, output: Option<&T>) -> StepResult<&T> {
    output.ok_or(StepError::MissingInput { phase })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keys_by_payload_phase() {
        let mut outputs = PhaseOutputs::new();
        outputs.insert(PhaseOutput::Writing(WritingOutput {
            title: "T".into(),
            html: "<p>body</p>".into(),
            word_count: 1,
        }));

        assert!(outputs.contains(Phase::Writing));
        assert_eq!(outputs.writing().unwrap().title, "T");
        assert!(outputs.research().is_none());
    }

    #[test]
    fn test_degraded_reports_its_phase() {
        let degraded = PhaseOutput::Degraded {
            phase: Phase::LinkEnrichment,
        };
        assert_eq!(degraded.phase(), Phase::LinkEnrichment);

        let mut outputs = PhaseOutputs::new();
        outputs.insert(degraded);
        // Degraded payloads never satisfy a typed accessor
        assert!(outputs.link_enrichment().is_none());
        assert!(outputs.contains(Phase::LinkEnrichment));
    }

    #[test]
    fn test_final_html_prefers_linked_markup() {
        let mut outputs = PhaseOutputs::new();
        outputs.insert(PhaseOutput::Writing(WritingOutput {
            title: "T".into(),
            html: "<p>raw</p>".into(),
            word_count: 1,
        }));
        assert_eq!(outputs.final_html(), Some("<p>raw</p>"));

        outputs.insert(PhaseOutput::LinkEnrichment(LinkEnrichmentOutput {
            html: "<p>linked</p>".into(),
            ..Default::default()
        }));
        assert_eq!(outputs.final_html(), Some("<p>linked</p>"));
    }

    #[test]
    fn test_serialized_shape_is_tagged() {
        let output = PhaseOutput::Meta(MetaOutput {
            meta_title: "a".into(),
            meta_description: "b".into(),
            slug: "c".into(),
        });
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["kind"], "meta");
        assert_eq!(value["data"]["slug"], "c");
    }

    #[test]
    fn test_require_missing_is_terminal_error() {
        let outputs = PhaseOutputs::new();
        let err = require(Phase::Writing, outputs.writing()).unwrap_err();
        assert!(matches!(err, StepError::MissingInput { phase: Phase::Writing }));
    }
}
