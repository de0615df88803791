//! Link Insertion Engine.
//!
//! Weaves reference links into generated markup under placement
//! constraints: per-kind caps, one link per destination by default, a
//! per-section cap, a minimum distance between anchors, and a relevance
//! floor. Protected regions (existing links, headings, code, scripts) are
//! never touched.
//!
//! The engine is a pure function of its input and config. All scanning
//! state lives in a per-call accumulator.
//!
//! # Example
//!
//! ```
//! use orchestrator::links::{insert_links, LinkCandidate, LinkConfig, LinkInput};
//!
//! let internal = vec![LinkCandidate::new("https://blog.example/espresso", "Espresso Machines")
//!     .with_anchors(vec!["espresso machine".into()])];
//! let input = LinkInput {
//!     markup: "<p>My espresso machine hums every morning.</p>",
//!     internal: &internal,
//!     external: &[],
//!     primary_subject: "home espresso",
//! };
//!
//! let result = insert_links(&input, &LinkConfig::default());
//! assert_eq!(result.stats.internal_inserted, 1);
//! assert!(result.html.contains(r#"<a href="https://blog.example/espresso">espresso machine</a>"#));
//! ```

mod engine;
mod markup;
mod scoring;

pub use engine::insert_links;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Whether a link points inside or outside the publishing site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Internal,
    External,
}

/// A destination the engine may link to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCandidate {
    pub url: String,
    pub title: String,
    /// Phrases that may become the visible anchor. Falls back to the title.
    #[serde(default)]
    pub anchors: Vec<String>,
    /// Extra subject terms used for relevance scoring
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl LinkCandidate {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            anchors: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn with_anchors(mut self, anchors: Vec<String>) -> Self {
        self.anchors = anchors;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Distinct non-empty anchor phrases, longest first.
    pub(crate) fn anchor_phrases(&self) -> Vec<&str> {
        let mut phrases: Vec<&str> = self
            .anchors
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        if phrases.is_empty() && !self.title.trim().is_empty() {
            phrases.push(self.title.trim());
        }
        phrases.sort_by(|a, b| b.len().cmp(&a.len()));
        let mut seen = HashSet::new();
        phrases.retain(|p| seen.insert(p.to_lowercase()));
        phrases
    }
}

/// A link the engine placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertedLink {
    pub url: String,
    /// Anchor text exactly as it appears in the markup
    pub anchor_text: String,
    /// Character offset of the anchor text in the original markup
    pub offset: usize,
    /// Byte offset of the same position, for slicing the markup
    pub byte_offset: usize,
    /// Index of the owning section (0 is the first section)
    pub section: usize,
    #[serde(default)]
    pub section_heading: Option<String>,
    /// Relevance in [0, 1]
    pub relevance: f64,
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub internal_inserted: usize,
    pub external_inserted: usize,
    pub total_inserted: usize,
    pub avg_relevance_score: f64,
    pub rejected_low_score: usize,
}

/// Placement constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub max_internal_links: usize,
    pub max_external_links: usize,
    /// Includes links already present in the markup
    pub max_links_per_url: usize,
    pub max_links_per_section: usize,
    pub min_semantic_score: f64,
    /// Minimum gap in bytes between two inserted anchors
    pub min_link_distance: usize,
    /// Never link in the text before the first section heading
    pub skip_intro: bool,
    /// Open external links in a new tab
    pub external_new_tab: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_internal_links: 5,
            max_external_links: 3,
            max_links_per_url: 1,
            max_links_per_section: 2,
            min_semantic_score: 0.25,
            min_link_distance: 120,
            skip_intro: false,
            external_new_tab: true,
        }
    }
}

impl LinkConfig {
    pub fn with_max_internal_links(mut self, max: usize) -> Self {
        self.max_internal_links = max;
        self
    }

    pub fn with_max_external_links(mut self, max: usize) -> Self {
        self.max_external_links = max;
        self
    }

    pub fn with_max_links_per_url(mut self, max: usize) -> Self {
        self.max_links_per_url = max;
        self
    }

    pub fn with_max_links_per_section(mut self, max: usize) -> Self {
        self.max_links_per_section = max;
        self
    }

    pub fn with_min_semantic_score(mut self, score: f64) -> Self {
        self.min_semantic_score = score;
        self
    }

    pub fn with_min_link_distance(mut self, distance: usize) -> Self {
        self.min_link_distance = distance;
        self
    }

    pub fn with_skip_intro(mut self, skip: bool) -> Self {
        self.skip_intro = skip;
        self
    }
}

/// Engine input. Candidates are borrowed; the engine never mutates them.
#[derive(Debug, Clone, Copy)]
pub struct LinkInput<'a> {
    pub markup: &'a str,
    pub internal: &'a [LinkCandidate],
    pub external: &'a [LinkCandidate],
    /// The article's main subject, used for relevance scoring
    pub primary_subject: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResult {
    pub html: String,
    pub stats: LinkStats,
    /// Placed links ordered by offset
    pub links: Vec<InsertedLink>,
}
