//! Set differ.
//!
//! Equivalence is an arbitrary predicate (items may be multi-field structs
//! with normalization rules), so the diff is a linear scan rather than a
//! hash lookup.

use crate::types::Delta;

/// Compute the create/remove/keep delta between `have` and `want`.
///
/// `create` keeps the order of `want`, `remove` the order of `have`. No
/// sorting or deduplication happens beyond the `equal` test.
pub fn diff<T, F>(have: &[T], want: &[T], equal: F) -> Delta<T>
where
    T: Clone,
    F: Fn(&T, &T) -> bool,
{
    let (keep, create): (Vec<T>, Vec<T>) = want
        .iter()
        .cloned()
        .partition(|w| have.iter().any(|h| equal(h, w)));

    let remove = have
        .iter()
        .filter(|h| !want.iter().any(|w| equal(h, w)))
        .cloned()
        .collect();

    Delta {
        create,
        remove,
        keep,
    }
}

/// Find the first pair of equivalent items in `items`, if any.
pub fn first_duplicate<T, F>(items: &[T], equal: F) -> Option<(&T, &T)>
where
    F: Fn(&T, &T) -> bool,
{
    items.iter().enumerate().find_map(|(i, a)| {
        items
            .iter()
            .skip(i.saturating_add(1))
            .find(|b| equal(a, b))
            .map(|b| (a, b))
    })
}
