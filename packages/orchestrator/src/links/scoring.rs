//! Relevance scoring between a link candidate and a content section.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "best", "by", "can", "do", "for", "from",
    "guide", "has", "have", "how", "in", "into", "is", "it", "its", "of", "on", "or", "our",
    "so", "that", "the", "their", "this", "to", "top", "was", "what", "when", "where", "which",
    "who", "why", "will", "with", "you", "your",
];

const COVERAGE_WEIGHT: f64 = 0.55;
const HEADING_WEIGHT: f64 = 0.2;
const SUBJECT_WEIGHT: f64 = 0.25;

/// Scripts written without spaces between words (Han, kana, Thai and
/// neighbours). Word boundaries mean nothing inside them.
pub(crate) fn is_unspaced(c: char) -> bool {
    matches!(
        c as u32,
        0x0E00..=0x0EFF       // Thai, Lao
            | 0x1000..=0x109F // Myanmar
            | 0x1780..=0x17FF // Khmer
            | 0x3040..=0x30FF // Hiragana, Katakana
            | 0x3400..=0x4DBF // CJK extension A
            | 0x4E00..=0x9FFF // CJK unified ideographs
            | 0xF900..=0xFAFF // CJK compatibility ideographs
            | 0xFF66..=0xFF9F // Halfwidth katakana
            | 0x20000..=0x2FA1F
    )
}

/// Lowercased, lightly stemmed content terms.
///
/// Runs of unspaced script become character bigrams, so "咖啡机" yields
/// "咖啡" and "啡机" and can meet the same bigrams in a sentence.
pub(crate) fn terms(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let mut rest = token;
        while let Some(first) = rest.chars().next() {
            let unspaced = is_unspaced(first);
            let end = rest
                .char_indices()
                .find(|&(_, c)| is_unspaced(c) != unspaced)
                .map_or(rest.len(), |(i, _)| i);
            let (run, tail) = rest.split_at(end);
            if unspaced {
                bigrams(run, &mut out);
            } else {
                word(run, &mut out);
            }
            rest = tail;
        }
    }
    out
}

fn word(run: &str, out: &mut HashSet<String>) {
    if run.chars().count() < 2 {
        return;
    }
    let lower = run.to_lowercase();
    if !STOPWORDS.contains(&lower.as_str()) {
        out.insert(stem(&lower));
    }
}

fn bigrams(run: &str, out: &mut HashSet<String>) {
    let chars: Vec<char> = run.chars().collect();
    if chars.len() == 1 {
        out.insert(run.to_string());
        return;
    }
    for pair in chars.windows(2) {
        out.insert(pair.iter().collect());
    }
}

/// Strip a plural `s` so "machines" and "machine" meet.
fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Share of `part`'s terms that also occur in `whole`; 0 when `part` is empty.
pub(crate) fn share(part: &HashSet<String>, whole: &HashSet<String>) -> f64 {
    if part.is_empty() {
        0.0
    } else {
        part.intersection(whole).count() as f64 / part.len() as f64
    }
}

/// Weighted blend, clamped to [0, 1]:
/// - share of the candidate's terms present in the section
/// - `heading_match`, the share of the anchor's terms in the section heading
/// - share of the primary subject's terms the candidate shares
pub(crate) fn relevance(
    candidate: &HashSet<String>,
    section: &HashSet<String>,
    heading_match: f64,
    subject: &HashSet<String>,
) -> f64 {
    let coverage = share(candidate, section);
    let subject_overlap = share(subject, candidate);

    (COVERAGE_WEIGHT * coverage
        + HEADING_WEIGHT * heading_match.clamp(0.0, 1.0)
        + SUBJECT_WEIGHT * subject_overlap)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_drop_stopwords_and_stem() {
        let t = terms("The Best Espresso Machines, for YOU!");
        assert_eq!(t, HashSet::from(["espresso".to_string(), "machine".to_string()]));
    }

    #[test]
    fn test_stem_keeps_double_s() {
        assert_eq!(stem("glass"), "glass");
        assert_eq!(stem("gas"), "gas");
        assert_eq!(stem("grinders"), "grinder");
    }

    #[test]
    fn test_relevance_bounds() {
        let all = terms("espresso machine");
        assert!((relevance(&all, &all, 1.0, &all) - 1.0).abs() < 1e-9);
        assert_eq!(relevance(&HashSet::new(), &all, 0.0, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_unrelated_candidate_scores_low() {
        let candidate = terms("Quantum chromodynamics lecture notes");
        let section = terms("My espresso machine hums every morning");
        let subject = terms("home espresso");
        let score = relevance(&candidate, &section, 0.0, &subject);
        assert!(score < 0.25, "score {score}");
    }

    #[test]
    fn test_heading_match_raises_score() {
        let candidate = terms("Burr grinders");
        let section = terms("A burr grinder matters");
        let subject = terms("home espresso");
        let plain = relevance(&candidate, &section, 0.0, &subject);
        let under_heading = relevance(&candidate, &section, 1.0, &subject);
        assert!((under_heading - plain - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_unspaced_text_becomes_bigrams() {
        let t = terms("咖啡机");
        assert_eq!(t, HashSet::from(["咖啡".to_string(), "啡机".to_string()]));

        let sentence = terms("我每天早上都用我的咖啡机做咖啡。");
        assert!(t.is_subset(&sentence));
        assert!(!sentence.contains("我每天早上都用我的咖啡机做咖啡"));
    }

    #[test]
    fn test_mixed_script_token_splits_by_script() {
        let t = terms("iPhone拍照");
        assert_eq!(t, HashSet::from(["iphone".to_string(), "拍照".to_string()]));
    }
}
