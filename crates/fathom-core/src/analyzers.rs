//! Text analyzers for the search stack.
//!
//! An analyzer turns raw text into a finite, ordered list of [`Token`]s
//! (tokenizer + filters). Token positions are re-indexed after filtering so
//! consumers always see dense positions, which the phrase-proximity scorer
//! relies on.
//!
//! Named profiles:
//!
//! - `default` / `english`: word tokenizer, lowercase, stopwords, light
//!   Porter-style stemming
//! - `english-nostem`: as above without stemming
//! - `code-friendly`: preserves `_`, `.` and CamelCase identifiers; no
//!   stemming
//! - `keyword`: the whole input is a single token
//! - `path`: slash-separated inputs become lowercased segments; inputs
//!   without a slash fall through to `default`
//!
//! The stopword set and the stemmer's suffix tables are fixed constants;
//! ranking stability across index rebuilds depends on them not changing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

/// A token emitted by an analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalized token text.
    pub text: String,
    /// Dense position within the analyzed value (post-filtering).
    pub position: usize,
    /// Byte offset of the token start in the input.
    pub start_char: usize,
    /// Byte offset one past the token end in the input.
    pub end_char: usize,
}

/// Fixed stopword set shared by the text analyzers.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Complex suffix rewrite rules, tried before the simple suffix strips.
///
/// Order matters: the first applicable rule wins.
const SUFFIX_RULES: &[(&str, &str)] = &[
    ("ization", "ize"),
    ("ational", "ate"),
    ("fulness", "ful"),
    ("ousness", "ous"),
    ("iveness", "ive"),
    ("tional", "tion"),
    ("biliti", "ble"),
    ("lessli", "less"),
    ("entli", "ent"),
    ("enci", "ence"),
    ("anci", "ance"),
    ("izer", "ize"),
    ("abli", "able"),
    ("alli", "al"),
    ("ator", "ate"),
    ("alism", "al"),
    ("aliti", "al"),
    ("ousli", "ous"),
    ("ration", "rate"),
    ("ation", "ate"),
    ("ness", ""),
    ("ment", ""),
    ("ance", "an"),
    ("ence", "en"),
    ("able", ""),
    ("ible", ""),
];

const SIMPLE_SUFFIXES: &[&str] = &["ingly", "edly", "ing", "ed", "ly", "es", "s"];

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w']+").unwrap_or_else(|e| unreachable!("word pattern: {e}")));

// Preserves underscores in identifiers (get_queryset), dots in module
// paths (torch.nn.Module) and CamelCase tokens.
static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+(?:[._]\w+)*").unwrap_or_else(|e| unreachable!("code pattern: {e}")));

/// Stem a single word with the light Porter-style routine.
///
/// Complex suffix rules run first, then the simple suffix strips. The stem
/// never drops below two characters; words that no rule applies to are
/// returned lowercased.
#[must_use]
pub fn stem_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if let Some(candidate) = strip_complex_suffix(&lower) {
        return candidate;
    }
    if let Some(candidate) = strip_simple_suffix(&lower) {
        return candidate;
    }
    lower
}

fn strip_complex_suffix(lower: &str) -> Option<String> {
    for (suffix, replacement) in SUFFIX_RULES {
        if lower.ends_with(suffix) && lower.len() - suffix.len() >= 2 {
            let candidate = format!("{}{}", &lower[..lower.len() - suffix.len()], replacement);
            if candidate.len() >= 2 {
                return Some(candidate);
            }
        }
    }
    None
}

fn strip_simple_suffix(lower: &str) -> Option<String> {
    for suffix in SIMPLE_SUFFIXES {
        if lower.ends_with(suffix) && lower.len() - suffix.len() >= 2 {
            return Some(lower[..lower.len() - suffix.len()].to_string());
        }
    }
    None
}

/// A concrete analyzer profile.
///
/// Profiles are resolved from the schema's analyzer names; passing an
/// explicit value avoids any process-global registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Word tokenizer, lowercase, stopwords, stemming.
    Standard,
    /// Word tokenizer, lowercase, stopwords, no stemming.
    StandardNoStem,
    /// Code tokenizer (preserves `_`/`.`), lowercase, stopwords, no
    /// stemming.
    CodeFriendly,
    /// Whole input as one token.
    Keyword,
    /// Slash-separated segments; falls back to [`Analyzer::Standard`] for
    /// slashless inputs so query text keeps matching path fields.
    Path,
}

impl Analyzer {
    /// Resolve an analyzer by profile name; `None` means `default`.
    pub fn from_name(name: Option<&str>) -> Result<Self> {
        let Some(name) = name else {
            return Ok(Self::Standard);
        };
        match name.to_lowercase().as_str() {
            "default" | "english" | "aggressive-stem" => Ok(Self::Standard),
            "english-nostem" => Ok(Self::StandardNoStem),
            "code-friendly" => Ok(Self::CodeFriendly),
            "keyword" => Ok(Self::Keyword),
            "path" => Ok(Self::Path),
            other => Err(Error::Config(format!("Unknown analyzer '{other}'"))),
        }
    }

    /// Analyze `text` into dense-positioned tokens.
    #[must_use]
    pub fn analyze(self, text: &str) -> Vec<Token> {
        match self {
            Self::Standard => pipeline(tokenize_words(text), true),
            Self::StandardNoStem => pipeline(tokenize_words(text), false),
            Self::CodeFriendly => pipeline(tokenize_code(text), false),
            Self::Keyword => analyze_keyword(text),
            Self::Path => analyze_path(text),
        }
    }
}

fn tokenize_words(text: &str) -> Vec<Token> {
    WORD_PATTERN
        .find_iter(text)
        .enumerate()
        .map(|(position, m)| Token {
            text: m.as_str().to_string(),
            position,
            start_char: m.start(),
            end_char: m.end(),
        })
        .collect()
}

fn tokenize_code(text: &str) -> Vec<Token> {
    CODE_PATTERN
        .find_iter(text)
        .enumerate()
        .map(|(position, m)| Token {
            text: m.as_str().to_string(),
            position,
            start_char: m.start(),
            end_char: m.end(),
        })
        .collect()
}

/// Lowercase, drop stopwords, optionally stem, then re-index positions.
fn pipeline(tokens: Vec<Token>, apply_stemming: bool) -> Vec<Token> {
    let mut out: Vec<Token> = tokens
        .into_iter()
        .filter_map(|mut token| {
            token.text = token.text.to_lowercase();
            if DEFAULT_STOPWORDS.contains(&token.text.as_str()) {
                return None;
            }
            if apply_stemming {
                token.text = stem_word(&token.text);
            }
            Some(token)
        })
        .collect();
    for (idx, token) in out.iter_mut().enumerate() {
        token.position = idx;
    }
    out
}

fn analyze_keyword(text: &str) -> Vec<Token> {
    if text.is_empty() {
        return Vec::new();
    }
    vec![Token {
        text: text.to_string(),
        position: 0,
        start_char: 0,
        end_char: text.len(),
    }]
}

fn analyze_path(text: &str) -> Vec<Token> {
    if text.is_empty() {
        return Vec::new();
    }
    if !text.contains('/') {
        return Analyzer::Standard.analyze(text);
    }

    let mut tokens = Vec::new();
    let mut position = 0;
    let mut char_pos = 0;
    for segment in text.split('/') {
        if segment.is_empty() {
            char_pos += 1;
            continue;
        }
        tokens.push(Token {
            text: segment.to_lowercase(),
            position,
            start_char: char_pos,
            end_char: char_pos + segment.len(),
        });
        position += 1;
        char_pos += segment.len() + 1;
    }
    tokens
}
