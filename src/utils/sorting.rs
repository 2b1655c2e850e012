use std::cmp::Ordering;

use lexical_sort::natural_lexical_cmp;

use crate::hierarchies::ProcessedHierarchyNode;

/// Labels sort naturally ("Model 2" before "Model 10") and without regard to
/// case or accents.
pub fn compare_labels(lhs: &str, rhs: &str) -> Ordering {
    natural_lexical_cmp(lhs, rhs)
}

pub fn compare_nodes_by_label(lhs: &ProcessedHierarchyNode, rhs: &ProcessedHierarchyNode) -> Ordering {
    compare_labels(lhs.label(), rhs.label())
}

/// Merge two sequences that are each already sorted according to `cmp` into
/// one sorted sequence in a single pass.  On ties, items from `lhs` come
/// before items from `rhs`.
pub fn merge_sorted_vecs<T, F>(lhs: Vec<T>, rhs: Vec<T>, cmp: F) -> Vec<T>
where
    F: Fn(&T, &T) -> Ordering,
{
    let mut merged = Vec::with_capacity(lhs.len() + rhs.len());
    let mut lhs = lhs.into_iter().peekable();
    let mut rhs = rhs.into_iter().peekable();
    loop {
        let take_lhs = match (lhs.peek(), rhs.peek()) {
            (Some(l), Some(r)) => cmp(l, r) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_lhs { lhs.next() } else { rhs.next() };
        merged.extend(next);
    }
    merged
}
