//! Static domain thesaurus for query expansion.
//!
//! Groups are bi-directional: any member of a group expands to every other
//! member. The table carries both surface forms and the stems the standard
//! analyzer produces, because expansion runs on analyzed query terms.
//! Output ordering is deterministic (sorted) so ranking stays stable.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;

/// Synonym groups for documentation search.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["config", "configuration", "configurate", "settings", "setting"],
    &["docs", "doc", "documentation"],
    &["auth", "authentication", "authenticate"],
    &["db", "database"],
    &["delete", "remove", "drop"],
    &["create", "add", "new"],
    &["error", "exception", "failure"],
    &["function", "method"],
    &["directory", "folder"],
    &["argument", "parameter", "param"],
    &["install", "installation", "setup"],
    &["query", "queri", "lookup"],
    &["upgrade", "update", "migrate"],
    &["test", "testing"],
];

static SYNONYM_TABLE: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for group in SYNONYM_GROUPS {
        for member in *group {
            table.insert(*member, *group);
        }
    }
    table
});

/// Synonyms for a single term, excluding the term itself.
#[must_use]
pub fn synonyms_for(term: &str) -> Vec<&'static str> {
    SYNONYM_TABLE.get(term).map_or_else(Vec::new, |group| {
        group.iter().copied().filter(|m| *m != term).collect()
    })
}

/// Expand a set of query terms with their synonyms.
///
/// Returns only the new terms (input terms are excluded), sorted for
/// deterministic downstream ordering.
#[must_use]
pub fn expand_query_terms(terms: &[String]) -> BTreeSet<String> {
    let mut expanded = BTreeSet::new();
    for term in terms {
        for synonym in synonyms_for(term) {
            if !terms.iter().any(|t| t == synonym) {
                expanded.insert(synonym.to_string());
            }
        }
    }
    expanded
}
