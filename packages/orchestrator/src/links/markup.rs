//! Markup scanning: protected regions, sections, existing links.
//!
//! Operates on byte offsets into the original markup. Lookups that need
//! case folding use an ASCII-lowercased copy, which keeps offsets aligned.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_PROTECTED_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(a|h[1-6]|script|style|code|pre|button|figcaption)\b[^>]*>").unwrap()
});
static RE_SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h[23]\b[^>]*>(.*?)</h[23]\s*>").unwrap());
static RE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["']"#).unwrap()
});

/// A heading-delimited region of the markup.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Section {
    /// `None` for the intro before the first heading
    pub heading: Option<String>,
    pub range: Range<usize>,
}

impl Section {
    pub fn is_intro(&self) -> bool {
        self.heading.is_none()
    }
}

/// Sorted, merged byte ranges where no link may be placed: every tag,
/// comments, and the full extent of protected elements.
pub(crate) fn protected_ranges(markup: &str) -> Vec<Range<usize>> {
    let lower = markup.to_ascii_lowercase();

    let mut ranges: Vec<Range<usize>> = RE_TAG.find_iter(markup).map(|m| m.range()).collect();
    ranges.extend(RE_COMMENT.find_iter(markup).map(|m| m.range()));

    for caps in RE_PROTECTED_OPEN.captures_iter(markup) {
        let (Some(open), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str().to_ascii_lowercase();
        let end = find_closing(&lower, open.end(), &name).unwrap_or(markup.len());
        ranges.push(open.start()..end);
    }

    merge(ranges)
}

/// End offset (exclusive) of the first `</name>` at or after `from`.
fn find_closing(lower: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("</{name}");
    let mut cursor = from;
    while let Some(found) = lower[cursor..].find(&needle) {
        let after = cursor + found + needle.len();
        // `</a` must not match `</abbr>`
        match lower[after..].chars().next() {
            Some(c) if c == '>' || c.is_whitespace() => {
                return lower[after..].find('>').map(|i| after + i + 1);
            }
            Some(_) => cursor = after,
            None => return None,
        }
    }
    None
}

fn merge(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// True when `range` touches any protected range.
pub(crate) fn is_protected(protected: &[Range<usize>], range: &Range<usize>) -> bool {
    let idx = protected.partition_point(|p| p.end <= range.start);
    protected
        .get(idx)
        .is_some_and(|p| p.start < range.end)
}

/// Split the markup at `h2`/`h3` headings. Always returns at least one
/// section; the text before the first heading is the intro.
pub(crate) fn sections(markup: &str) -> Vec<Section> {
    let headings: Vec<(usize, String)> = RE_SECTION_HEADING
        .captures_iter(markup)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let text = plain_text(caps.get(1)?.as_str());
            Some((whole.start(), collapse_whitespace(&text)))
        })
        .collect();

    let mut sections = Vec::with_capacity(headings.len() + 1);
    let first_start = headings.first().map_or(markup.len(), |(start, _)| *start);
    if first_start > 0 || headings.is_empty() {
        sections.push(Section {
            heading: None,
            range: 0..first_start,
        });
    }

    for (i, (start, heading)) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map_or(markup.len(), |(next, _)| *next);
        sections.push(Section {
            heading: Some(heading.clone()),
            range: *start..end,
        });
    }

    sections
}

/// Index of the section containing `offset`.
pub(crate) fn section_at(sections: &[Section], offset: usize) -> usize {
    sections
        .partition_point(|s| s.range.start <= offset)
        .saturating_sub(1)
}

/// Markup with tags replaced by spaces.
pub(crate) fn plain_text(fragment: &str) -> String {
    RE_TAG.replace_all(fragment, " ").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `href` values of links already in the markup.
pub(crate) fn existing_hrefs(markup: &str) -> Vec<String> {
    RE_HREF
        .captures_iter(markup)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
