//! Candidate matching, placement planning and rewriting.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use regex::RegexBuilder;
use tracing::debug;

use super::markup::{self, Section};
use super::scoring;
use super::{InsertedLink, LinkCandidate, LinkConfig, LinkInput, LinkKind, LinkResult, LinkStats};

/// One place a candidate's anchor phrase occurs in unprotected text.
#[derive(Debug)]
struct Occurrence {
    range: Range<usize>,
    section: usize,
    score: f64,
}

/// A candidate that cleared the relevance floor somewhere.
struct Scored<'c> {
    candidate: &'c LinkCandidate,
    kind: LinkKind,
    url_key: String,
    best: f64,
    occurrences: Vec<Occurrence>,
}

/// Placement accumulator threaded through one engine call.
struct Placement {
    taken: Vec<Range<usize>>,
    per_url: HashMap<String, usize>,
    per_section: HashMap<usize, usize>,
    internal: usize,
    external: usize,
    anchors_used: HashSet<String>,
    links: Vec<InsertedLink>,
}

impl Placement {
    /// Existing hrefs count toward the per-destination cap.
    fn seeded(markup: &str) -> Self {
        let mut per_url = HashMap::new();
        for href in markup::existing_hrefs(markup) {
            *per_url.entry(url_key(&href)).or_insert(0) += 1;
        }
        Self {
            taken: Vec::new(),
            per_url,
            per_section: HashMap::new(),
            internal: 0,
            external: 0,
            anchors_used: HashSet::new(),
            links: Vec::new(),
        }
    }

    fn admits(
        &self,
        scored: &Scored<'_>,
        occurrence: &Occurrence,
        anchor: &str,
        sections: &[Section],
        config: &LinkConfig,
    ) -> bool {
        let under_kind_cap = match scored.kind {
            LinkKind::Internal => self.internal < config.max_internal_links,
            LinkKind::External => self.external < config.max_external_links,
        };
        if !under_kind_cap {
            return false;
        }
        if self.per_url.get(&scored.url_key).copied().unwrap_or(0) >= config.max_links_per_url {
            return false;
        }
        if self.per_section.get(&occurrence.section).copied().unwrap_or(0)
            >= config.max_links_per_section
        {
            return false;
        }
        if config.skip_intro && sections[occurrence.section].is_intro() {
            return false;
        }
        if self.anchors_used.contains(&anchor.to_lowercase()) {
            return false;
        }
        self.taken
            .iter()
            .all(|t| gap(t, &occurrence.range).is_some_and(|g| g >= config.min_link_distance))
    }

    fn place(&mut self, scored: &Scored<'_>, occurrence: &Occurrence, anchor: &str, sections: &[Section]) {
        match scored.kind {
            LinkKind::Internal => self.internal += 1,
            LinkKind::External => self.external += 1,
        }
        *self.per_url.entry(scored.url_key.clone()).or_insert(0) += 1;
        *self.per_section.entry(occurrence.section).or_insert(0) += 1;
        self.anchors_used.insert(anchor.to_lowercase());
        self.taken.push(occurrence.range.clone());
        self.links.push(InsertedLink {
            url: scored.candidate.url.trim().to_string(),
            anchor_text: anchor.to_string(),
            // Character offset filled in once placement is done
            offset: 0,
            byte_offset: occurrence.range.start,
            section: occurrence.section,
            section_heading: sections[occurrence.section].heading.clone(),
            relevance: occurrence.score,
            kind: scored.kind,
        });
    }
}

/// Bytes between two ranges, `None` when they overlap.
fn gap(a: &Range<usize>, b: &Range<usize>) -> Option<usize> {
    if b.start >= a.end {
        Some(b.start - a.end)
    } else if a.start >= b.end {
        Some(a.start - b.end)
    } else {
        None
    }
}

fn url_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A word character from a script that separates words with spaces.
fn is_spaced_word_char(c: char) -> bool {
    is_word_char(c) && !scoring::is_unspaced(c)
}

/// Whole-word test for a match. A boundary is only required where both the
/// anchor edge and its neighbour belong to a space-delimited script.
fn on_word_boundary(markup: &str, range: &Range<usize>) -> bool {
    let matched = &markup[range.clone()];
    let joins = |edge: Option<char>, neighbour: Option<char>| match (edge, neighbour) {
        (Some(e), Some(n)) => is_spaced_word_char(e) && is_spaced_word_char(n),
        _ => false,
    };
    !joins(matched.chars().next(), markup[..range.start].chars().next_back())
        && !joins(matched.chars().next_back(), markup[range.end..].chars().next())
}

/// Case-insensitive, whole-word occurrences of the candidate's anchor
/// phrases outside protected regions. Longer phrases claim text first.
fn find_occurrences(markup: &str, candidate: &LinkCandidate, protected: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut found: Vec<Range<usize>> = Vec::new();

    for phrase in candidate.anchor_phrases() {
        let pattern = phrase
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+");
        let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
            continue;
        };

        for m in re.find_iter(markup) {
            let range = m.range();
            if !on_word_boundary(markup, &range) {
                continue;
            }
            if markup::is_protected(protected, &range) {
                continue;
            }
            if found.iter().any(|f| gap(f, &range).is_none()) {
                continue;
            }
            found.push(range);
        }
    }

    found.sort_by_key(|r| r.start);
    found
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn anchor_tag(link: &InsertedLink, config: &LinkConfig) -> String {
    let extra = match link.kind {
        LinkKind::External if config.external_new_tab => r#" target="_blank" rel="noopener noreferrer""#,
        _ => "",
    };
    format!(
        r#"<a href="{}"{extra}>{}</a>"#,
        escape_attr(&link.url),
        link.anchor_text
    )
}

/// Rewrite `markup` with a bounded, well-distributed set of links.
///
/// Candidates are scored per section where one of their anchor phrases
/// occurs; a candidate whose best score falls below
/// `min_semantic_score` is rejected and counted. Survivors are placed in
/// descending score order, internal before external on ties, subject to
/// every cap in `config`. Offsets in the result refer to the original
/// markup, in characters (`offset`) and in bytes (`byte_offset`).
pub fn insert_links(input: &LinkInput<'_>, config: &LinkConfig) -> LinkResult {
    let markup = input.markup;
    let protected = markup::protected_ranges(markup);
    let sections = markup::sections(markup);
    let section_terms: Vec<HashSet<String>> = sections
        .iter()
        .map(|s| scoring::terms(&markup::plain_text(&markup[s.range.clone()])))
        .collect();
    let heading_terms: Vec<HashSet<String>> = sections
        .iter()
        .map(|s| s.heading.as_deref().map(scoring::terms).unwrap_or_default())
        .collect();
    let subject_terms = scoring::terms(input.primary_subject);

    let mut rejected_low_score = 0;
    let mut scored: Vec<Scored<'_>> = Vec::new();

    let candidates = input
        .internal
        .iter()
        .map(|c| (c, LinkKind::Internal))
        .chain(input.external.iter().map(|c| (c, LinkKind::External)));

    for (candidate, kind) in candidates {
        if candidate.url.trim().is_empty() {
            continue;
        }
        let ranges = find_occurrences(markup, candidate, &protected);
        if ranges.is_empty() {
            continue;
        }

        let mut candidate_terms = scoring::terms(&candidate.title);
        for keyword in &candidate.keywords {
            candidate_terms.extend(scoring::terms(keyword));
        }

        let mut best = 0.0_f64;
        let mut occurrences = Vec::new();
        for range in ranges {
            let section = markup::section_at(&sections, range.start);
            let anchor_terms = scoring::terms(&markup[range.clone()]);
            let heading_match = scoring::share(&anchor_terms, &heading_terms[section]);
            let score = scoring::relevance(
                &candidate_terms,
                &section_terms[section],
                heading_match,
                &subject_terms,
            );
            best = best.max(score);
            if score >= config.min_semantic_score {
                occurrences.push(Occurrence { range, section, score });
            }
        }

        if best < config.min_semantic_score {
            debug!(url = %candidate.url, score = best, "link candidate below relevance floor");
            rejected_low_score += 1;
            continue;
        }

        occurrences.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.range.start.cmp(&b.range.start))
        });
        scored.push(Scored {
            candidate,
            kind,
            url_key: url_key(&candidate.url),
            best,
            occurrences,
        });
    }

    // Stable: internal candidates keep precedence on equal scores
    scored.sort_by(|a, b| b.best.total_cmp(&a.best));

    let mut placement = Placement::seeded(markup);
    for candidate in &scored {
        for occurrence in &candidate.occurrences {
            let anchor = &markup[occurrence.range.clone()];
            if placement.admits(candidate, occurrence, anchor, &sections, config) {
                placement.place(candidate, occurrence, anchor, &sections);
            }
        }
    }

    let mut links = placement.links;
    links.sort_by_key(|l| l.byte_offset);

    let mut chars_before = 0;
    let mut counted_to = 0;
    for link in &mut links {
        chars_before += markup[counted_to..link.byte_offset].chars().count();
        counted_to = link.byte_offset;
        link.offset = chars_before;
    }

    let mut html = markup.to_string();
    for link in links.iter().rev() {
        let end = link.byte_offset + link.anchor_text.len();
        html.replace_range(link.byte_offset..end, &anchor_tag(link, config));
    }

    let internal_inserted = placement.internal;
    let external_inserted = placement.external;
    let total_inserted = links.len();
    let avg_relevance_score = if links.is_empty() {
        0.0
    } else {
        links.iter().map(|l| l.relevance).sum::<f64>() / total_inserted as f64
    };

    debug!(
        inserted = total_inserted,
        rejected = rejected_low_score,
        sections = sections.len(),
        "link insertion finished"
    );

    LinkResult {
        html,
        stats: LinkStats {
            internal_inserted,
            external_inserted,
            total_inserted,
            avg_relevance_score,
            rejected_low_score,
        },
        links,
    }
}
