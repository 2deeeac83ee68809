//! Property-based tests for the set differ using proptest.
//!
//! Properties verified:
//! - Totality: every desired item is created or kept, every observed item is
//!   removed or matched, and disjoint sets replace each other wholesale
//! - Idempotence: applying the delta and diffing again yields nothing to do
//! - Order insensitivity: permuting either input permutes but does not change
//!   the delta

use std::collections::BTreeSet;

use proptest::prelude::*;
use tether_reconciler::{diff, Equivalent, PolicyReference};

fn eq(a: &String, b: &String) -> bool {
    a.equivalent(b)
}

fn names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-f]{1,2}", 0..12).prop_map(|set| set.into_iter().collect())
}

fn other_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[g-k]{1,2}", 0..12).prop_map(|set| set.into_iter().collect())
}

fn sorted(items: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    items
}

fn as_set(items: &[String]) -> BTreeSet<String> {
    items.iter().cloned().collect()
}

fn customer_managed() -> impl Strategy<Value = PolicyReference> {
    (
        "[A-C]",
        prop_oneof![Just(""), Just("/"), Just("ops"), Just("/ops"), Just("ops/"), Just("/ops/")],
    )
        .prop_map(|(name, path)| PolicyReference::customer_managed(name, path))
}

// ==========================================================================
// PROPERTY: Totality
// ==========================================================================

proptest! {
    #[test]
    fn prop_diff_is_total(have in names(), want in names()) {
        let delta = diff(&have, &want, eq);

        for item in &want {
            let created = delta.create.contains(item);
            let kept = delta.keep.contains(item);
            prop_assert!(created != kept, "{} must be created xor kept", item);
            prop_assert_eq!(kept, have.contains(item));
        }
        for item in &have {
            let removed = delta.remove.contains(item);
            prop_assert!(removed != want.contains(item), "{} must be removed xor wanted", item);
        }
        prop_assert_eq!(delta.create.len().checked_add(delta.keep.len()), Some(want.len()));
    }

    #[test]
    fn prop_disjoint_sets_replace_everything(have in names(), want in other_names()) {
        let delta = diff(&have, &want, eq);

        prop_assert_eq!(&delta.create, &want);
        prop_assert_eq!(&delta.remove, &have);
        prop_assert!(delta.keep.is_empty());
    }
}

// ==========================================================================
// PROPERTY: Idempotence
// ==========================================================================

proptest! {
    #[test]
    fn prop_applied_delta_converges(have in names(), want in names()) {
        let delta = diff(&have, &want, eq);

        let mut applied: Vec<String> = have
            .iter()
            .filter(|item| !delta.remove.contains(item))
            .cloned()
            .collect();
        applied.extend(delta.create.iter().cloned());

        let again = diff(&applied, &want, eq);
        prop_assert!(again.is_converged());
        prop_assert_eq!(sorted(&again.keep), sorted(&want));
    }

    #[test]
    fn prop_equivalence_aware_diff_converges(
        have in prop::collection::vec(customer_managed(), 0..6),
        want in prop::collection::vec(customer_managed(), 0..6),
    ) {
        // Desired sets are pairwise non-equivalent.
        let mut want_unique: Vec<PolicyReference> = Vec::new();
        for item in want {
            if !want_unique.iter().any(|w| w.equivalent(&item)) {
                want_unique.push(item);
            }
        }

        let delta = diff(&have, &want_unique, PolicyReference::equivalent);
        let mut applied: Vec<PolicyReference> = have
            .iter()
            .filter(|item| !delta.remove.contains(item))
            .cloned()
            .collect();
        applied.extend(delta.create.iter().cloned());

        prop_assert!(diff(&applied, &want_unique, PolicyReference::equivalent).is_converged());
    }
}

// ==========================================================================
// PROPERTY: Order insensitivity
// ==========================================================================

proptest! {
    #[test]
    fn prop_diff_ignores_input_order(
        have in names(),
        want in names(),
        have_shift in 0usize..12,
        want_shift in 0usize..12,
    ) {
        let delta = diff(&have, &want, eq);

        let mut have_rotated = have.clone();
        let mut want_rotated = want.clone();
        have_rotated.reverse();
        let have_len = have_rotated.len();
        have_rotated.rotate_left(have_shift.checked_rem(have_len).unwrap_or(0));
        let want_len = want_rotated.len();
        want_rotated.rotate_left(want_shift.checked_rem(want_len).unwrap_or(0));
        let permuted = diff(&have_rotated, &want_rotated, eq);

        prop_assert_eq!(as_set(&delta.create), as_set(&permuted.create));
        prop_assert_eq!(as_set(&delta.remove), as_set(&permuted.remove));
        prop_assert_eq!(as_set(&delta.keep), as_set(&permuted.keep));
    }
}
