//! BM25 scoring primitives and per-field length statistics.

use std::collections::HashMap;

/// Aggregate length statistics for one field across a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldLengthStats {
    /// Documents carrying the field.
    pub doc_count: usize,
    /// Mean field length in tokens.
    pub average_length: f64,
}

/// Compute per-field length statistics from a segment's length table.
#[must_use]
pub fn compute_field_length_stats(
    field_lengths: &HashMap<String, HashMap<String, u64>>,
) -> HashMap<String, FieldLengthStats> {
    field_lengths
        .iter()
        .map(|(field, lengths)| {
            let doc_count = lengths.len();
            let total: u64 = lengths.values().sum();
            #[allow(clippy::cast_precision_loss)]
            let average_length = if doc_count == 0 {
                0.0
            } else {
                total as f64 / doc_count as f64
            };
            (
                field.clone(),
                FieldLengthStats {
                    doc_count,
                    average_length,
                },
            )
        })
        .collect()
}

/// Inverse document frequency: `ln((N - df + 0.5) / (df + 0.5))`.
///
/// Can go negative for terms present in more than half the corpus; the
/// engine keeps that behavior so scores stay comparable with prior
/// segments.
#[must_use]
pub fn calculate_idf(doc_freq: usize, total_docs: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let (df, n) = (doc_freq as f64, total_docs.max(1) as f64);
    ((n - df + 0.5) / (df + 0.5)).ln()
}

/// BM25 term weight with length normalization.
///
/// `tf_norm = (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * dl / avgdl))`
#[must_use]
pub fn bm25_weight(term_freq: usize, doc_length: u64, avg_length: f64, k1: f64, b: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let (tf, dl) = (term_freq as f64, doc_length as f64);
    let avg = avg_length.max(1e-9);
    (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avg))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn idf_decreases_with_document_frequency() {
        let rare = calculate_idf(1, 100);
        let common = calculate_idf(50, 100);
        assert!(rare > common);
        assert!(rare > 0.0);
    }

    #[test]
    fn idf_goes_negative_for_ubiquitous_terms() {
        assert!(calculate_idf(99, 100) < 0.0);
    }

    #[test]
    fn bm25_weight_saturates_with_term_frequency() {
        let one = bm25_weight(1, 100, 100.0, 1.2, 0.75);
        let five = bm25_weight(5, 100, 100.0, 1.2, 0.75);
        let fifty = bm25_weight(50, 100, 100.0, 1.2, 0.75);

        assert!(five > one);
        assert!(fifty > five);
        // Saturation: the marginal gain shrinks.
        assert!(fifty - five < five - one);
    }

    #[test]
    fn bm25_weight_penalizes_long_documents() {
        let short = bm25_weight(2, 50, 100.0, 1.2, 0.75);
        let long = bm25_weight(2, 400, 100.0, 1.2, 0.75);
        assert!(short > long);
    }

    #[test]
    fn field_length_stats_average() {
        let mut lengths = HashMap::new();
        let mut body = HashMap::new();
        body.insert("a".to_string(), 100_u64);
        body.insert("b".to_string(), 300_u64);
        lengths.insert("body".to_string(), body);

        let stats = compute_field_length_stats(&lengths);
        let body_stats = stats.get("body").unwrap();
        assert_eq!(body_stats.doc_count, 2);
        assert_eq!(body_stats.average_length, 200.0);
    }
}
