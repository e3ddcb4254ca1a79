//! Signal property-based tests
//!
//! Randomized checks of read/write, propagation and change detection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use proptest::prelude::*;

use krait_core::reactive::{Scope, Signal, SignalOwner};
use krait_core::{fingerprint, SignalError};

#[derive(Default)]
struct Example {
    scope: Scope,
}

impl SignalOwner for Example {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}

fn price() -> impl Strategy<Value = f64> {
    100.0f64..10_000.0
}

// ============================================================================
// Primitive signals
// ============================================================================

proptest! {
    /// A fresh instance reads the declared initial value.
    #[test]
    fn prop_initial_value(initial in price()) {
        let prop: Signal<Example, f64> = Signal::new(initial);
        prop_assert_eq!(prop.read(&Example::default()).unwrap(), initial);
    }

    /// The last write wins, and repeating it is not a change.
    #[test]
    fn prop_write_round_trip(values in prop::collection::vec(price(), 1..10)) {
        let prop: Signal<Example, f64> = Signal::new(0.0);
        let example = Example::default();

        for value in &values {
            prop.write(&example, *value).unwrap();
            prop_assert_eq!(prop.read(&example).unwrap(), *value);
            prop_assert!(!prop.write(&example, *value).unwrap());
        }
    }

    /// Writing through one instance is seen by all when shared, by none otherwise.
    #[test]
    fn prop_shared_visibility(value in price(), shared in any::<bool>()) {
        let prop: Signal<Example, f64> = Signal::new(0.0).shared(shared);
        let first = Example::default();
        let second = Example::default();

        prop.write(&first, value).unwrap();
        let expected = if shared { value } else { 0.0 };
        prop_assert_eq!(prop.read(&second).unwrap(), expected);
    }
}

// ============================================================================
// Computed signals
// ============================================================================

proptest! {
    /// Dependents always observe the latest upstream value.
    #[test]
    fn prop_dependency_propagation(initial in price(), updates in prop::collection::vec(price(), 1..10)) {
        let a: Arc<Signal<Example, f64>> = Arc::new(Signal::new(initial));
        let runs = Arc::new(AtomicUsize::new(0));
        let b: Signal<Example, f64> = {
            let a = Arc::clone(&a);
            let runs = Arc::clone(&runs);
            Signal::computed(move |this| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(a.read(this)? + 1.0)
            })
        };
        let example = Example::default();

        prop_assert_eq!(b.read(&example).unwrap(), initial + 1.0);

        let mut last = initial;
        for update in updates {
            let before = runs.load(Ordering::SeqCst);
            a.write(&example, update).unwrap();
            prop_assert_eq!(b.read(&example).unwrap(), update + 1.0);

            let recomputed = runs.load(Ordering::SeqCst) - before;
            prop_assert_eq!(recomputed, usize::from(update != last));
            last = update;
        }
    }

    /// Every write to a computed signal is rejected.
    #[test]
    fn prop_computed_rejects_writes(value in price()) {
        let dynamic: Signal<Example, f64> = Signal::computed(move |_| Ok(value)).named("foo");
        let example = Example::default();

        let rejected = matches!(
            dynamic.write(&example, value),
            Err(SignalError::UnsupportedWrite { .. })
        );
        prop_assert!(rejected);
        prop_assert_eq!(dynamic.read(&example).unwrap(), value);
    }
}

// ============================================================================
// Change detection
// ============================================================================

proptest! {
    /// Map fingerprints ignore insertion order.
    #[test]
    fn prop_map_fingerprint_order_independent(
        entries in prop::collection::hash_map("[a-z]{1,8}", any::<i64>(), 0..16)
    ) {
        let forward: IndexMap<String, i64> = entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let mut reversed = forward.clone();
        reversed.reverse();
        let hashed: HashMap<String, i64> = entries;

        prop_assert_eq!(fingerprint(&forward), fingerprint(&reversed));
        prop_assert_eq!(fingerprint(&forward), fingerprint(&hashed));
    }

    /// Sequence fingerprints depend on order.
    #[test]
    fn prop_sequence_fingerprint_detects_swaps(items in prop::collection::vec(any::<i32>(), 2..16)) {
        prop_assume!(items[0] != items[1]);
        let mut swapped = items.clone();
        swapped.swap(0, 1);

        prop_assert_ne!(fingerprint(&items), fingerprint(&swapped));
    }
}
