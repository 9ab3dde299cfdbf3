//! Fuzzy term matching for typo correction.
//!
//! Used by the BM25 engine as a fallback when a query term has no postings
//! in a field's vocabulary. The allowed edit distance scales with term
//! length so short terms never fuzz.

/// Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0_usize; b_chars.len() + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(a_ch != b_ch);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b_chars.len()]
}

/// Maximum edit distance allowed for a term of the given length.
///
/// 1–2 chars: exact only. 3–5 chars: one edit. 6+ chars: two edits.
#[must_use]
pub const fn max_edit_distance(term_len: usize) -> usize {
    match term_len {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Find vocabulary terms within edit distance of `term`.
///
/// Returns `(term, distance)` pairs sorted by distance ascending; an exact
/// match (distance 0) therefore always comes first. `max_distance` of
/// `None` uses [`max_edit_distance`] for the term's length.
#[must_use]
pub fn find_fuzzy_matches<'a, I>(
    term: &str,
    vocabulary: I,
    max_distance: Option<usize>,
) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    if term.is_empty() {
        return Vec::new();
    }
    let limit = max_distance.unwrap_or_else(|| max_edit_distance(term.chars().count()));

    let mut matches: Vec<(String, usize)> = vocabulary
        .into_iter()
        .filter_map(|candidate| {
            // Length difference is a lower bound on the distance.
            let len_gap = candidate.chars().count().abs_diff(term.chars().count());
            if len_gap > limit {
                return None;
            }
            let distance = levenshtein_distance(term, candidate);
            (distance <= limit).then(|| (candidate.to_string(), distance))
        })
        .collect();

    matches.sort_by_key(|(_, distance)| *distance);
    matches
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identical_and_empty_strings() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }

    #[test]
    fn single_edits() {
        assert_eq!(levenshtein_distance("cat", "cats"), 1);
        assert_eq!(levenshtein_distance("cats", "cat"), 1);
        assert_eq!(levenshtein_distance("cat", "bat"), 1);
    }

    #[test]
    fn multiple_edits_and_case_sensitivity() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("abc", "xyz"), 3);
        assert_eq!(levenshtein_distance("Hello", "hello"), 1);
    }

    #[test]
    fn common_programming_typos() {
        assert_eq!(levenshtein_distance("configuration", "configration"), 1);
        assert_eq!(levenshtein_distance("serializer", "serailizer"), 2);
        assert_eq!(levenshtein_distance("django", "djagno"), 2);
    }

    #[test]
    fn edit_distance_budget_scales_with_length() {
        assert_eq!(max_edit_distance(1), 0);
        assert_eq!(max_edit_distance(2), 0);
        assert_eq!(max_edit_distance(3), 1);
        assert_eq!(max_edit_distance(5), 1);
        assert_eq!(max_edit_distance(6), 2);
        assert_eq!(max_edit_distance(20), 2);
    }

    #[test]
    fn exact_match_sorts_first() {
        let vocabulary = ["config", "configure", "configuration"];
        let matches = find_fuzzy_matches("config", vocabulary, None);

        assert!(!matches.is_empty());
        assert_eq!(matches[0], ("config".to_string(), 0));
    }

    #[test]
    fn finds_close_matches_within_budget() {
        let vocabulary = ["serializer", "serialize", "serial"];
        let matches = find_fuzzy_matches("serailizer", vocabulary, None);
        assert!(matches.iter().any(|(t, _)| t == "serializer"));
    }

    #[test]
    fn respects_explicit_max_distance() {
        let vocabulary = ["hello", "world", "help", "held"];
        let matches = find_fuzzy_matches("helo", vocabulary, Some(1));
        let terms: Vec<&str> = matches.iter().map(|(t, _)| t.as_str()).collect();
        assert!(terms.contains(&"hello"));
        assert!(terms.contains(&"help"));
        assert!(!terms.contains(&"held"));
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert!(find_fuzzy_matches("", ["a", "b"], None).is_empty());
        assert!(find_fuzzy_matches("test", [], None).is_empty());
    }

    #[test]
    fn nothing_beyond_the_distance_budget() {
        let vocabulary = ["xyz", "abc", "def"];
        assert!(find_fuzzy_matches("completely_different", vocabulary, Some(2)).is_empty());
    }

    #[test]
    fn results_sorted_by_distance_ascending() {
        let vocabulary = ["test", "tests", "testing", "tast", "toast"];
        let matches = find_fuzzy_matches("test", vocabulary, None);

        assert_eq!(matches[0], ("test".to_string(), 0));
        let distances: Vec<usize> = matches.iter().map(|(_, d)| *d).collect();
        let mut sorted = distances.clone();
        sorted.sort_unstable();
        assert_eq!(distances, sorted);
    }

    proptest::proptest! {
        #[test]
        fn distance_is_symmetric(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
            proptest::prop_assert_eq!(
                levenshtein_distance(&a, &b),
                levenshtein_distance(&b, &a)
            );
        }

        #[test]
        fn distance_to_self_is_zero(a in "[a-z]{0,12}") {
            proptest::prop_assert_eq!(levenshtein_distance(&a, &a), 0);
        }
    }

    #[test]
    fn real_world_typo_corrections() {
        let vocabulary = ["django", "models", "serializer", "viewset", "queryset"];
        let terms = |q: &str| {
            find_fuzzy_matches(q, vocabulary, None)
                .into_iter()
                .map(|(t, _)| t)
                .collect::<Vec<_>>()
        };
        assert!(terms("djagno").contains(&"django".to_string()));
        assert!(terms("modls").contains(&"models".to_string()));

        let vocabulary = ["authentication", "configuration", "implementation"];
        let matches = find_fuzzy_matches("authenication", vocabulary, None);
        assert!(matches.iter().any(|(t, _)| t == "authentication"));
    }
}
