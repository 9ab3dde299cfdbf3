//! BM25/BM25F scoring over a sealed index segment.
//!
//! Query tokenization mirrors each indexed text field's analyzer, so query
//! terms line up with what the indexer wrote. Base terms (those produced
//! directly from the query, as opposed to synonyms) are eligible for fuzzy
//! fallback when they miss the field vocabulary.
//!
//! Post-ranking modifiers, each independently switchable:
//! language preference (×1.1 for English documents), phrase proximity
//! (up to ×1.5 for tight term windows), and a flat +0.05 when the raw
//! query appears verbatim in the body.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::analyzers::Analyzer;
use crate::search::fuzzy::find_fuzzy_matches;
use crate::search::phrase::min_span;
use crate::search::schema::Schema;
use crate::search::stats::{bm25_weight, calculate_idf, compute_field_length_stats};
use crate::search::storage::{Posting, Segment};
use crate::search::synonyms::expand_query_terms;
use crate::Result;

/// Fuzzy match contributions are discounted to prefer exact matches.
const FUZZY_DISCOUNT: f64 = 0.8;

/// Multiplier applied to English documents when the language boost is on.
const LANGUAGE_BOOST: f64 = 1.1;

/// Ceiling of the phrase proximity bonus.
const MAX_PHRASE_BONUS: f64 = 1.5;

/// Additive bonus when the raw query appears verbatim in the body.
const TEXT_PROXIMITY_BONUS: f64 = 0.05;

/// A scored document produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    /// Document id (unique-field value).
    pub doc_id: String,
    /// Accumulated BM25F score after modifiers.
    pub score: f64,
}

/// Immutable snapshot of query terms aligned with index fields.
#[derive(Debug, Clone, Default)]
pub struct QueryTokens {
    /// Ordered unique terms per indexed text field.
    pub per_field: BTreeMap<String, Vec<String>>,
    /// All terms in first-seen order across fields.
    pub ordered_terms: Vec<String>,
    /// How many of the body field's terms came directly from the query
    /// (synonym expansions follow them); only these fuzz.
    pub base_term_count: usize,
    /// The raw (trimmed) query text.
    pub seed_text: String,
}

impl QueryTokens {
    /// True when no field produced any terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_field.is_empty()
    }
}

/// Ranking knobs, typically derived from tenant search configuration.
#[derive(Debug, Clone)]
pub struct RankingOptions {
    /// BM25 `k1` (term-frequency saturation).
    pub k1: f64,
    /// BM25 `b` (length normalization strength).
    pub b: f64,
    /// Expand base terms with the static thesaurus.
    pub enable_synonyms: bool,
    /// Apply the phrase proximity multiplier for multi-term queries.
    pub enable_phrase_bonus: bool,
    /// Fall back to Levenshtein-closest vocabulary terms.
    pub enable_fuzzy: bool,
    /// Prefer English documents in mixed corpora (×1.1).
    pub enable_language_boost: bool,
    /// Flat bonus when the raw query appears verbatim in the body.
    pub enable_text_proximity_bonus: bool,
    /// Per-field boost overrides; fields not listed use the schema boost.
    pub field_boosts: HashMap<String, f64>,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            enable_synonyms: true,
            enable_phrase_bonus: true,
            enable_fuzzy: true,
            enable_language_boost: true,
            enable_text_proximity_bonus: true,
            field_boosts: HashMap::new(),
        }
    }
}

/// BM25F engine bound to a schema.
#[derive(Debug, Clone)]
pub struct Bm25Engine {
    schema: Schema,
    options: RankingOptions,
}

impl Bm25Engine {
    /// Build an engine for a schema with the given options.
    #[must_use]
    pub fn new(schema: Schema, options: RankingOptions) -> Self {
        Self { schema, options }
    }

    /// The schema the engine scores against.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn field_boost(&self, field: &str) -> f64 {
        self.options
            .field_boosts
            .get(field)
            .copied()
            .unwrap_or_else(|| self.schema.boost(field))
    }

    /// Tokenize a raw query against every indexed text field.
    pub fn tokenize_query(&self, seed_text: &str) -> Result<QueryTokens> {
        let normalized = seed_text.trim();
        if normalized.is_empty() {
            return Ok(QueryTokens::default());
        }

        let mut per_field: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut ordered_terms: Vec<String> = Vec::new();
        let mut base_term_count = 0;

        for field in self.schema.text_fields() {
            let analyzer = Analyzer::from_name(field.analyzer_name.as_deref())?;
            let mut seen_in_field: Vec<String> = Vec::new();
            let mut base_terms: Vec<String> = Vec::new();
            for token in analyzer.analyze(normalized) {
                if token.text.is_empty() || seen_in_field.contains(&token.text) {
                    continue;
                }
                seen_in_field.push(token.text.clone());
                base_terms.push(token.text);
            }

            if field.name == "body" && base_term_count == 0 {
                base_term_count = base_terms.len();
            }

            let mut terms = base_terms.clone();
            if self.options.enable_synonyms && !base_terms.is_empty() {
                for synonym in expand_query_terms(&base_terms) {
                    if seen_in_field.contains(&synonym) {
                        continue;
                    }
                    seen_in_field.push(synonym.clone());
                    terms.push(synonym);
                }
            }

            if terms.is_empty() {
                continue;
            }
            for term in &terms {
                if !ordered_terms.contains(term) {
                    ordered_terms.push(term.clone());
                }
            }
            per_field.insert(field.name.clone(), terms);
        }

        Ok(QueryTokens {
            per_field,
            ordered_terms,
            base_term_count,
            seed_text: normalized.to_string(),
        })
    }

    /// Score the segment for a tokenized query and return the top `limit`
    /// documents in non-increasing score order.
    pub fn score(
        &self,
        segment: &Segment,
        query_tokens: &QueryTokens,
        limit: usize,
    ) -> Result<Vec<RankedDocument>> {
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let all_lengths = segment.all_field_lengths()?;
        let length_stats = compute_field_length_stats(&all_lengths);
        let total_docs = segment.doc_count.max(1);

        let mut doc_scores: HashMap<String, f64> = HashMap::new();
        let mut fuzzy_cache: HashMap<(String, String), Option<String>> = HashMap::new();
        let mut body_postings: Option<BTreeMap<String, Vec<Posting>>> = None;

        for (field_name, terms) in &query_tokens.per_field {
            let Some(stats) = length_stats.get(field_name) else {
                continue;
            };
            let postings_by_term = segment.get_field_postings(field_name)?;
            if postings_by_term.is_empty() {
                continue;
            }

            let field_boost = self.field_boost(field_name);
            let empty = HashMap::new();
            let doc_lengths = all_lengths.get(field_name).unwrap_or(&empty);

            for (term_idx, term) in terms.iter().enumerate() {
                let is_base_term = term_idx < query_tokens.base_term_count;
                let (postings, discount) = resolve_postings(
                    term,
                    field_name,
                    &postings_by_term,
                    self.options.enable_fuzzy && is_base_term,
                    &mut fuzzy_cache,
                );
                let Some(postings) = postings else { continue };
                if postings.is_empty() {
                    continue;
                }

                let idf = calculate_idf(postings.len(), total_docs);
                for posting in postings {
                    let doc_length = doc_lengths
                        .get(&posting.doc_id)
                        .copied()
                        .unwrap_or(posting.frequency() as u64);
                    let weight = bm25_weight(
                        posting.frequency(),
                        doc_length,
                        stats.average_length,
                        self.options.k1,
                        self.options.b,
                    );
                    if weight <= 0.0 {
                        continue;
                    }
                    *doc_scores.entry(posting.doc_id.clone()).or_insert(0.0) +=
                        idf * weight * field_boost * discount;
                }
            }

            if field_name == "body" {
                body_postings = Some(postings_by_term);
            }
        }

        if doc_scores.is_empty() {
            return Ok(Vec::new());
        }

        self.apply_stored_field_modifiers(segment, &mut doc_scores, &query_tokens.seed_text)?;
        if self.options.enable_phrase_bonus && !query_tokens.seed_text.is_empty() {
            self.apply_phrase_bonus(
                segment,
                &mut doc_scores,
                &query_tokens.seed_text,
                body_postings,
            )?;
        }

        let mut ranked: Vec<RankedDocument> = doc_scores
            .into_iter()
            .map(|(doc_id, score)| RankedDocument { doc_id, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        ranked.truncate(limit);
        debug!(results = ranked.len(), "BM25 scoring complete");
        Ok(ranked)
    }

    /// Language preference and verbatim-query bonuses, both driven by
    /// stored fields, applied in a single pass over the candidates.
    fn apply_stored_field_modifiers(
        &self,
        segment: &Segment,
        doc_scores: &mut HashMap<String, f64>,
        seed_text: &str,
    ) -> Result<()> {
        if !self.options.enable_language_boost && !self.options.enable_text_proximity_bonus {
            return Ok(());
        }
        let needle = seed_text.to_lowercase();
        for (doc_id, score) in doc_scores.iter_mut() {
            let Some(stored) = segment.get_document(doc_id)? else {
                continue;
            };
            if self.options.enable_language_boost {
                let language = stored
                    .get("language")
                    .and_then(|v| v.as_str())
                    .unwrap_or("en");
                if language == "en" {
                    *score *= LANGUAGE_BOOST;
                }
            }
            if self.options.enable_text_proximity_bonus && !needle.is_empty() {
                let body = stored.get("body").and_then(|v| v.as_str()).unwrap_or("");
                if body.to_lowercase().contains(&needle) {
                    *score += TEXT_PROXIMITY_BONUS;
                }
            }
        }
        Ok(())
    }

    /// Phrase proximity bonus for multi-word queries.
    ///
    /// Term positions come from the inverted index, not from re-analyzing
    /// document text. Adjacent terms earn the full multiplier; the bonus
    /// decays linearly with scatter and vanishes at 3x the query length.
    fn apply_phrase_bonus(
        &self,
        segment: &Segment,
        doc_scores: &mut HashMap<String, f64>,
        seed_text: &str,
        cached_body_postings: Option<BTreeMap<String, Vec<Posting>>>,
    ) -> Result<()> {
        let Some(body_field) = self.schema.text_fields().into_iter().find(|f| f.name == "body")
        else {
            return Ok(());
        };
        let analyzer = Analyzer::from_name(body_field.analyzer_name.as_deref())?;
        let query_tokens: Vec<String> = analyzer
            .analyze(seed_text)
            .into_iter()
            .map(|t| t.text)
            .filter(|t| !t.is_empty())
            .collect();
        if query_tokens.len() < 2 {
            return Ok(());
        }

        let body_postings = match cached_body_postings {
            Some(postings) => postings,
            None => segment.get_field_postings("body")?,
        };
        if body_postings.is_empty() {
            return Ok(());
        }

        #[allow(clippy::cast_precision_loss)]
        let term_count = query_tokens.len() as f64;

        for (doc_id, score) in doc_scores.iter_mut() {
            let mut term_positions: HashMap<String, Vec<u32>> = HashMap::new();
            for token in &query_tokens {
                if let Some(postings) = body_postings.get(token) {
                    if let Some(posting) = postings.iter().find(|p| &p.doc_id == doc_id) {
                        term_positions.insert(token.clone(), posting.positions.clone());
                    }
                }
            }
            if term_positions.len() < query_tokens.len() {
                continue;
            }
            let Some(span) = min_span(&term_positions) else {
                continue;
            };

            if f64::from(span) <= term_count {
                *score *= MAX_PHRASE_BONUS;
                continue;
            }
            let scatter_ratio = f64::from(span) / term_count;
            if scatter_ratio >= 3.0 {
                continue;
            }
            let bonus = MAX_PHRASE_BONUS - (scatter_ratio - 1.0) * (MAX_PHRASE_BONUS - 1.0) / 2.0;
            *score *= bonus.max(1.0);
        }
        Ok(())
    }
}

/// Resolve postings for a term, falling back to the Levenshtein-closest
/// vocabulary term when allowed. Returns the postings with the discount to
/// apply (1.0 exact, [`FUZZY_DISCOUNT`] fuzzy).
fn resolve_postings<'a>(
    term: &str,
    field_name: &str,
    postings_by_term: &'a BTreeMap<String, Vec<Posting>>,
    allow_fuzzy: bool,
    fuzzy_cache: &mut HashMap<(String, String), Option<String>>,
) -> (Option<&'a Vec<Posting>>, f64) {
    if let Some(postings) = postings_by_term.get(term) {
        return (Some(postings), 1.0);
    }
    if !allow_fuzzy {
        return (None, 1.0);
    }

    let cache_key = (term.to_string(), field_name.to_string());
    if let Some(cached) = fuzzy_cache.get(&cache_key) {
        return match cached {
            Some(fuzzy_term) => (postings_by_term.get(fuzzy_term), FUZZY_DISCOUNT),
            None => (None, 1.0),
        };
    }

    let matches = find_fuzzy_matches(
        term,
        postings_by_term.keys().map(String::as_str),
        None,
    );
    let resolved = matches
        .first()
        .map(|(fuzzy_term, _)| fuzzy_term.clone())
        .filter(|fuzzy_term| postings_by_term.contains_key(fuzzy_term));
    fuzzy_cache.insert(cache_key, resolved.clone());
    match resolved {
        Some(fuzzy_term) => (postings_by_term.get(&fuzzy_term), FUZZY_DISCOUNT),
        None => (None, 1.0),
    }
}
