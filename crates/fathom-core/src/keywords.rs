//! Keyword extraction and query analysis.
//!
//! Pure functions over query text: acronyms, technical nouns, technical
//! terms (snake_case / CamelCase / hyphenated), and common verb forms.
//! The results enrich search match traces and diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;

/// Stopwords filtered from technical nouns and normalized tokens.
const QUERY_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "will", "are", "was", "were",
    "been", "being", "you", "your", "can", "should", "would", "could", "may", "might", "must",
    "than", "then", "them", "they", "their", "there", "where", "when", "what", "which", "who",
    "why", "how", "about",
];

/// Common words excluded from acronym detection.
const ACRONYM_EXCLUDES: &[&str] = &[
    "THE", "AND", "FOR", "WITH", "HOW", "WHAT", "WHEN", "WHERE", "THAT", "THIS", "FROM", "HAVE",
    "WILL",
];

static ACRONYM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,6}\b").unwrap_or_else(|e| unreachable!("acronym: {e}")));
static NOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z][a-z0-9]{2,}\b").unwrap_or_else(|e| unreachable!("noun: {e}"))
});
static SNAKE_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z]+_[a-z_]+\b").unwrap_or_else(|e| unreachable!("snake: {e}"))
});
// Requires lower-upper-lower structure, so five-char tokens like `VSCode`
// (two leading capitals) do not match.
static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+[A-Z][a-zA-Z]+\b").unwrap_or_else(|e| unreachable!("camel: {e}"))
});
static HYPHENATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z]+-[a-z-]+\b").unwrap_or_else(|e| unreachable!("hyphen: {e}"))
});
static VERB_FORMS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bcreat\w+\b",
        r"\bupdat\w+\b",
        r"\bdelet\w+\b",
        r"\bretriev\w+\b",
        r"\bvalidat\w+\b",
        r"\bserializ\w+\b",
        r"\bauthentica\w+\b",
        r"\bauthoriz\w+\b",
        r"\bconfigur\w+\b",
        r"\bdeploy\w+\b",
        r"\binstal\w+\b",
        r"\benabl\w+\b",
        r"\bdisabl\w+\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});
static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\W+").unwrap_or_else(|e| unreachable!("non-word: {e}")));

/// Extracted keyword groups for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct KeywordSet {
    /// 2–6 letter uppercase acronyms (common words excluded).
    pub acronyms: Vec<String>,
    /// Lowercase technical nouns of four or more characters.
    pub technical_nouns: Vec<String>,
    /// snake_case, CamelCase, and hyphenated identifiers.
    pub technical_terms: Vec<String>,
    /// Matched verb forms (create/update/configure/...).
    pub verb_forms: Vec<String>,
}

/// A query after analysis.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AnalyzedQuery {
    /// The raw query text.
    pub original_text: String,
    /// Lowercased, stopword-filtered tokens.
    pub normalized_tokens: Vec<String>,
    /// Extracted keyword groups.
    pub extracted_keywords: KeywordSet,
    /// Tenant codename the query targets, when known.
    pub tenant_context: Option<String>,
}

/// Extract all keyword groups from query text.
#[must_use]
pub fn extract_keywords(text: &str) -> KeywordSet {
    KeywordSet {
        acronyms: extract_acronyms(text),
        technical_nouns: extract_nouns(text),
        technical_terms: extract_technical_terms(text),
        verb_forms: extract_verb_forms(text),
    }
}

/// Analyze a raw query into normalized tokens plus keywords.
#[must_use]
pub fn analyze_query(raw_query: &str, tenant_context: Option<&str>) -> AnalyzedQuery {
    let lowered = raw_query.to_lowercase();
    let normalized_tokens = NON_WORD
        .split(&lowered)
        .filter(|t| !t.is_empty() && !QUERY_STOPWORDS.contains(t))
        .map(str::to_string)
        .collect();

    AnalyzedQuery {
        original_text: raw_query.to_string(),
        normalized_tokens,
        extracted_keywords: extract_keywords(raw_query),
        tenant_context: tenant_context.map(str::to_string),
    }
}

fn extract_acronyms(text: &str) -> Vec<String> {
    ACRONYM
        .find_iter(text)
        .filter(|m| {
            // Not at a sentence start: skip matches preceded by ". " or a
            // newline.
            let head = &text[..m.start()];
            !head.ends_with(". ") && !head.ends_with('\n')
        })
        .map(|m| m.as_str().to_string())
        .filter(|m| !ACRONYM_EXCLUDES.contains(&m.as_str()))
        .collect()
}

fn extract_nouns(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    NOUN.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 3 && !QUERY_STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn extract_technical_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for pattern in [&*SNAKE_CASE, &*CAMEL_CASE, &*HYPHENATED] {
        terms.extend(pattern.find_iter(text).map(|m| m.as_str().to_string()));
    }
    terms
}

fn extract_verb_forms(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut verbs = Vec::new();
    for pattern in VERB_FORMS.iter() {
        verbs.extend(pattern.find_iter(&lowered).map(|m| m.as_str().to_string()));
    }
    verbs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn acronyms_are_extracted_and_common_words_excluded() {
        let keywords = extract_keywords("Using the REST API with JSON and HTTP");
        assert_eq!(keywords.acronyms, vec!["REST", "API", "JSON", "HTTP"]);

        let keywords = extract_keywords("HOW THE WHAT");
        assert!(keywords.acronyms.is_empty());
    }

    #[test]
    fn sentence_initial_uppercase_words_are_skipped() {
        let keywords = extract_keywords("first sentence. ABC follows\nDEF too, but GHI counts");
        assert!(!keywords.acronyms.contains(&"ABC".to_string()));
        assert!(!keywords.acronyms.contains(&"DEF".to_string()));
        assert!(keywords.acronyms.contains(&"GHI".to_string()));
    }

    #[test]
    fn technical_nouns_filter_stopwords_and_short_words() {
        let keywords = extract_keywords("how to configure the database connection api");
        assert!(keywords.technical_nouns.contains(&"configure".to_string()));
        assert!(keywords.technical_nouns.contains(&"database".to_string()));
        assert!(keywords.technical_nouns.contains(&"connection".to_string()));
        // Too short and stopwords drop.
        assert!(!keywords.technical_nouns.contains(&"how".to_string()));
        assert!(!keywords.technical_nouns.contains(&"the".to_string()));
        assert!(!keywords.technical_nouns.contains(&"api".to_string()));
    }

    #[test]
    fn technical_terms_cover_snake_camel_and_hyphenated() {
        let keywords =
            extract_keywords("call get_queryset on ModelViewSet with cache-control headers");
        assert!(keywords.technical_terms.contains(&"get_queryset".to_string()));
        assert!(keywords.technical_terms.contains(&"ModelViewSet".to_string()));
        assert!(keywords.technical_terms.contains(&"cache-control".to_string()));
    }

    #[test]
    fn five_char_camelcase_like_vscode_is_not_matched() {
        // The CamelCase pattern needs a lower-upper transition after the
        // first letter, which `VSCode` does not have.
        let keywords = extract_keywords("open VSCode and CamelCase files");
        assert!(!keywords.technical_terms.contains(&"VSCode".to_string()));
        assert!(keywords.technical_terms.contains(&"CamelCase".to_string()));
    }

    #[test]
    fn verb_forms_match_common_actions() {
        let keywords =
            extract_keywords("creating serializers and configuring authentication for deployment");
        assert!(keywords.verb_forms.contains(&"creating".to_string()));
        assert!(keywords.verb_forms.contains(&"serializers".to_string()));
        assert!(keywords.verb_forms.contains(&"configuring".to_string()));
        assert!(keywords.verb_forms.contains(&"authentication".to_string()));
        assert!(keywords.verb_forms.contains(&"deployment".to_string()));
    }

    #[test]
    fn analyze_query_normalizes_tokens() {
        let analyzed = analyze_query("How to configure the Database?", Some("django-docs"));

        assert_eq!(analyzed.original_text, "How to configure the Database?");
        assert_eq!(analyzed.normalized_tokens, vec!["to", "configure", "database"]);
        assert_eq!(analyzed.tenant_context.as_deref(), Some("django-docs"));
    }

    #[test]
    fn empty_query_is_harmless() {
        let analyzed = analyze_query("", None);
        assert!(analyzed.normalized_tokens.is_empty());
        assert_eq!(analyzed.extracted_keywords, KeywordSet::default());
    }
}
