//! Minimum-span computation for phrase proximity scoring.
//!
//! Given one position list per query term (recovered from the inverted
//! index, not re-analyzed text), [`min_span`] finds the smallest token
//! window containing at least one occurrence of every term.

use std::collections::HashMap;

/// Smallest window (inclusive token count) covering one occurrence of each
/// term, or `None` when any term has no positions.
///
/// For two adjacent terms at positions `p` and `p + 1` the span is 2.
#[must_use]
pub fn min_span(term_positions: &HashMap<String, Vec<u32>>) -> Option<u32> {
    if term_positions.is_empty() || term_positions.values().any(Vec::is_empty) {
        return None;
    }

    // Flatten into (position, term index) events sorted by position, then
    // slide a window maintaining per-term coverage counts.
    let term_count = term_positions.len();
    let mut events: Vec<(u32, usize)> = Vec::new();
    for (idx, positions) in term_positions.values().enumerate() {
        for &pos in positions {
            events.push((pos, idx));
        }
    }
    events.sort_unstable();

    let mut counts = vec![0_usize; term_count];
    let mut covered = 0;
    let mut left = 0;
    let mut best: Option<u32> = None;

    for right in 0..events.len() {
        let (_, term_idx) = events[right];
        if counts[term_idx] == 0 {
            covered += 1;
        }
        counts[term_idx] += 1;

        while covered == term_count {
            let span = events[right].0 - events[left].0 + 1;
            best = Some(best.map_or(span, |b| b.min(span)));

            let (_, left_term) = events[left];
            counts[left_term] -= 1;
            if counts[left_term] == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }
    best
}
