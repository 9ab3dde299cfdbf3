//! Sentence-aware snippet extraction and term highlighting.
//!
//! Snippets expand from the first matching term to the enclosing sentence
//! (`[.!?]` + whitespace boundaries, searched within fixed lookback and
//! lookahead budgets), clamp to a maximum length, then highlight up to
//! three matches. Highlighting never touches text inside markdown links
//! and prefers longer matches when candidates overlap.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default snippet length ceiling in characters.
pub const DEFAULT_MAX_CHARS: usize = 300;

/// Default context budget around a match, also the sentence-boundary
/// search distance.
pub const DEFAULT_SURROUNDING_CONTEXT: usize = 100;

/// Maximum number of highlighted terms per snippet.
const MAX_HIGHLIGHTS: usize = 3;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap_or_else(|e| unreachable!("sentence regex: {e}")));
static WORD_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").unwrap_or_else(|e| unreachable!("boundary regex: {e}")));
static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]*)\]\(([^)]*)\)").unwrap_or_else(|e| unreachable!("link regex: {e}"))
});

/// Highlight rendering style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnippetStyle {
    /// `[[term]]` markers.
    #[default]
    Plain,
    /// `<mark>term</mark>` markers.
    Html,
}

impl SnippetStyle {
    /// Parse a style name; anything other than `html` is plain.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("html") {
            Self::Html
        } else {
            Self::Plain
        }
    }
}

/// Clamp a byte index down to the nearest char boundary.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Find the start of the sentence containing `position`, looking back at
/// most `max_lookback` bytes.
#[must_use]
pub fn find_sentence_start(text: &str, position: usize, max_lookback: usize) -> usize {
    if position == 0 {
        return 0;
    }
    let position = floor_char_boundary(text, position);
    let start_search = floor_char_boundary(text, position.saturating_sub(max_lookback));
    let search_text = &text[start_search..position];

    if let Some(last) = SENTENCE_END.find_iter(search_text).last() {
        return start_search + last.end();
    }

    // No sentence boundary; settle for a word boundary past the first
    // quarter of the window.
    let quarter = search_text.len() / 4;
    for m in WORD_BOUNDARY.find_iter(search_text) {
        if m.start() >= quarter {
            return start_search + m.end();
        }
    }
    start_search
}

/// Find the end of the sentence containing `position`, looking ahead at
/// most `max_lookahead` bytes.
#[must_use]
pub fn find_sentence_end(text: &str, position: usize, max_lookahead: usize) -> usize {
    if position >= text.len() {
        return text.len();
    }
    let position = floor_char_boundary(text, position);
    let end_search = floor_char_boundary(text, (position + max_lookahead).min(text.len()));
    let search_text = &text[position..end_search];

    if let Some(m) = SENTENCE_END.find(search_text) {
        return position + m.end();
    }

    let three_quarters = (search_text.len() * 3) / 4;
    for m in WORD_BOUNDARY.find_iter(search_text).collect::<Vec<_>>().into_iter().rev() {
        if m.start() <= three_quarters {
            return position + m.start();
        }
    }
    end_search
}

/// Extract a sentence-aligned snippet around a match.
///
/// Returns the snippet text; the window is clamped to `max_chars` centered
/// on the match when the sentence expansion overshoots.
#[must_use]
pub fn extract_sentence_snippet(
    text: &str,
    match_position: usize,
    match_length: usize,
    max_chars: usize,
    surrounding_context: usize,
) -> String {
    if text.is_empty() {
        return String::new();
    }

    let initial_start = match_position.saturating_sub(surrounding_context);
    let initial_end = (match_position + match_length + surrounding_context).min(text.len());

    let mut start = find_sentence_start(text, initial_start, surrounding_context);
    let mut end = find_sentence_end(text, initial_end, surrounding_context);

    if end.saturating_sub(start) > max_chars {
        let half = max_chars / 2;
        let center = match_position + match_length / 2;
        start = floor_char_boundary(text, center.saturating_sub(half));
        end = floor_char_boundary(text, (center + half).min(text.len()));
    }

    text[floor_char_boundary(text, start)..floor_char_boundary(text, end)]
        .trim()
        .to_string()
}

/// Byte ranges inside markdown links (`[text](url)`) that must not be
/// highlighted.
fn markdown_link_regions(text: &str) -> Vec<(usize, usize)> {
    MARKDOWN_LINK
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect()
}

fn overlaps_region(start: usize, end: usize, regions: &[(usize, usize)]) -> bool {
    regions
        .iter()
        .any(|&(r_start, r_end)| start < r_end && end > r_start)
}

/// Highlight matching terms in a snippet.
///
/// At most [`MAX_HIGHLIGHTS`] non-overlapping matches are wrapped, longer
/// matches win ties, and markdown links are left untouched.
#[must_use]
pub fn highlight_terms(snippet: &str, terms: &[String], style: SnippetStyle) -> String {
    if snippet.is_empty() || terms.is_empty() {
        return snippet.to_string();
    }

    let protected = markdown_link_regions(snippet);

    let mut matches: Vec<(usize, usize, String)> = Vec::new();
    for term in terms {
        if term.len() < 2 {
            continue;
        }
        let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(term))) else {
            continue;
        };
        for m in pattern.find_iter(snippet) {
            matches.push((m.start(), m.end(), m.as_str().to_string()));
        }
    }
    if matches.is_empty() {
        return snippet.to_string();
    }

    // Start ascending, longer-first on ties so overlapping shorter matches
    // lose.
    matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0))));

    let mut selected: Vec<(usize, usize, String)> = Vec::new();
    for (start, end, matched) in matches {
        if overlaps_region(start, end, &protected) {
            continue;
        }
        let overlaps_selected = selected
            .iter()
            .any(|&(s_start, s_end, _)| start < s_end && end > s_start);
        if overlaps_selected {
            continue;
        }
        selected.push((start, end, matched));
        if selected.len() >= MAX_HIGHLIGHTS {
            break;
        }
    }
    if selected.is_empty() {
        return snippet.to_string();
    }

    // Apply from the end so earlier offsets stay valid.
    selected.sort_by(|a, b| b.0.cmp(&a.0));
    let mut result = snippet.to_string();
    for (start, end, matched) in selected {
        let replacement = match style {
            SnippetStyle::Html => format!("<mark>{matched}</mark>"),
            SnippetStyle::Plain => format!("[[{matched}]]"),
        };
        result.replace_range(start..end, &replacement);
    }
    result
}

/// Build a highlighted, sentence-aware snippet for a document body.
///
/// The snippet anchors on the earliest occurrence of any term; when no
/// term matches, the head of the text is returned unhighlighted.
#[must_use]
pub fn build_snippet(
    text: &str,
    terms: &[String],
    max_chars: usize,
    surrounding_context: usize,
    style: SnippetStyle,
) -> String {
    if text.is_empty() {
        return String::new();
    }
    if terms.is_empty() {
        return text[..floor_char_boundary(text, max_chars)].trim().to_string();
    }

    let text_lower = text.to_lowercase();
    let mut best: Option<(usize, usize)> = None;
    for term in terms {
        if term.is_empty() {
            continue;
        }
        if let Some(pos) = text_lower.find(&term.to_lowercase()) {
            if best.is_none_or(|(existing, _)| pos < existing) {
                best = Some((pos, term.len()));
            }
        }
    }

    let Some((match_pos, match_len)) = best else {
        return text[..floor_char_boundary(text, max_chars)].trim().to_string();
    };

    let snippet =
        extract_sentence_snippet(text, match_pos, match_len, max_chars, surrounding_context);
    highlight_terms(&snippet, terms, style)
}
