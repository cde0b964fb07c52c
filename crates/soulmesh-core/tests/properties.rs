//! Property-based tests for vector clock merge.
//!
//!  - Commutativity: merge(a, b) = merge(b, a)
//!  - Associativity: merge(merge(a, b), c) = merge(a, merge(b, c))
//!  - Idempotence:  merge(a, a) = a
//!  - Monotonicity: the merge dominates both inputs

use proptest::prelude::*;
use soulmesh_core::{ClockOrdering, VectorClock};

fn clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::btree_map("[a-e]", 0u64..50, 0..5)
        .prop_map(|entries| entries.into_iter().collect())
}

proptest! {
    #[test]
    fn merge_is_commutative(a in clock_strategy(), b in clock_strategy()) {
        prop_assert_eq!(a.merged_with(&b), b.merged_with(&a));
    }

    #[test]
    fn merge_is_associative(
        a in clock_strategy(),
        b in clock_strategy(),
        c in clock_strategy()
    ) {
        prop_assert_eq!(
            a.merged_with(&b).merged_with(&c),
            a.merged_with(&b.merged_with(&c))
        );
    }

    #[test]
    fn merge_is_idempotent(a in clock_strategy()) {
        prop_assert_eq!(a.merged_with(&a), a);
    }

    #[test]
    fn merge_never_shrinks(a in clock_strategy(), b in clock_strategy()) {
        let merged = a.merged_with(&b);
        prop_assert!(merged.dominates(&a));
        prop_assert!(merged.dominates(&b));
        prop_assert!(a.regressions(&merged).is_empty());
    }

    #[test]
    fn compare_is_antisymmetric(a in clock_strategy(), b in clock_strategy()) {
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
    }

    #[test]
    fn merged_clock_is_after_or_equal(a in clock_strategy(), b in clock_strategy()) {
        let ordering = a.merged_with(&b).compare(&a);
        prop_assert!(matches!(ordering, ClockOrdering::After | ClockOrdering::Equal));
    }
}
