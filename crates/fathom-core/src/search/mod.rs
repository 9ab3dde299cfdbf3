//! The per-tenant search engine: schema, segment storage, BM25F scoring,
//! and snippet rendering.

/// BM25/BM25F ranking over a segment.
pub mod bm25;
/// Fuzzy term matching for typo correction.
pub mod fuzzy;
/// Minimum-span computation for phrase proximity.
pub mod phrase;
/// Index schema definitions.
pub mod schema;
/// Sentence-aware snippets and highlighting.
pub mod snippet;
/// Scoring primitives and field statistics.
pub mod stats;
/// On-disk segment store.
pub mod storage;
/// Static thesaurus for query expansion.
pub mod synonyms;

pub use bm25::{Bm25Engine, QueryTokens, RankedDocument, RankingOptions};
pub use schema::{default_schema, schema_for_profile, FieldSpec, FieldType, Schema};
pub use snippet::SnippetStyle;
pub use storage::{Manifest, ManifestEntry, Posting, Segment, SegmentData, SegmentStore};
