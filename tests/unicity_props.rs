// Property-based tests of the unicity engine.
//
// Invariants exercised:
// - Identity by value: two handles are pointer-equal iff their terms are
//   structurally equal.
// - Refcount conservation: a cell's strong count equals the number of
//   outstanding handles on it; the table is empty once every handle is
//   gone.
// - Statistics sanity: `access = hits + misses`, `size <= peak`.

use fxhash::FxHashMap;
use proptest::prelude::*;
use unicity::{variant, Handle, Unicity};

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Zero;

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct One;

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Node {
    pub variable: i32,
    pub lo: Handle<SimpleDD>,
    pub hi: Handle<SimpleDD>,
}

variant! {
    pub enum SimpleDD { Zero, One, Node }
}

type DD = Handle<SimpleDD>;

// Structural equality computed without relying on handle identity, so it
// can be checked against it. Memoized on handle pairs to stay polynomial
// on shared graphs.
fn structural_eq(a: &DD, b: &DD, memo: &mut FxHashMap<(DD, DD), bool>) -> bool {
    if let Some(&known) = memo.get(&(a.clone(), b.clone())) {
        return known;
    }
    let res = match (&**a, &**b) {
        (SimpleDD::Zero(_), SimpleDD::Zero(_)) => true,
        (SimpleDD::One(_), SimpleDD::One(_)) => true,
        (SimpleDD::Node(x), SimpleDD::Node(y)) => {
            x.variable == y.variable
                && structural_eq(&x.lo, &y.lo, memo)
                && structural_eq(&x.hi, &y.hi, memo)
        }
        _ => false,
    };
    memo.insert((a.clone(), b.clone()), res);
    res
}

#[derive(Debug, Clone)]
enum Op {
    MakeTerminal(bool),
    MakeNode { lo: u8, hi: u8, variable: u8 },
    Drop(u8),
    Clone(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::MakeTerminal),
        (any::<u8>(), any::<u8>(), 0u8..4).prop_map(|(lo, hi, variable)| Op::MakeNode {
            lo,
            hi,
            variable
        }),
        any::<u8>().prop_map(Op::Drop),
        any::<u8>().prop_map(Op::Clone),
    ]
}

proptest! {
    #[test]
    fn identity_matches_structure(ops in proptest::collection::vec(op_strategy(), 1..120)) {
        // Deliberately tiny initial size, to exercise rehashing.
        let u = Unicity::<SimpleDD>::new(2);
        let mut live: Vec<DD> = Vec::new();

        for op in ops {
            match op {
                Op::MakeTerminal(one) => {
                    live.push(if one { u.make(One) } else { u.make(Zero) });
                }
                Op::MakeNode { lo, hi, variable } => {
                    let lo = match live.get(lo as usize % live.len().max(1)) {
                        Some(h) => h.clone(),
                        None => u.make(Zero),
                    };
                    let hi = match live.get(hi as usize % live.len().max(1)) {
                        Some(h) => h.clone(),
                        None => u.make(One),
                    };
                    live.push(u.make(Node { variable: variable as i32, lo, hi }));
                }
                Op::Drop(i) => {
                    if !live.is_empty() {
                        let i = i as usize % live.len();
                        live.swap_remove(i);
                    }
                }
                Op::Clone(i) => {
                    if !live.is_empty() {
                        let i = i as usize % live.len();
                        let h = live[i].clone();
                        live.push(h);
                    }
                }
            }

            // The newest handle agrees with structural equality against
            // everything alive.
            if let Some(latest) = live.last() {
                let mut memo = FxHashMap::default();
                for other in &live {
                    prop_assert_eq!(
                        latest == other,
                        structural_eq(latest, other, &mut memo)
                    );
                }
            }
        }

        // Full pairwise check at the end.
        let mut memo = FxHashMap::default();
        for a in &live {
            for b in &live {
                prop_assert_eq!(a == b, structural_eq(a, b, &mut memo));
            }
        }

        let stats = u.unique_table_stats();
        prop_assert_eq!(stats.access, stats.hits + stats.misses);
        prop_assert!(stats.size <= stats.peak);
        prop_assert!(stats.buckets.is_power_of_two());

        // Releasing every handle reclaims every cell.
        live.clear();
        prop_assert_eq!(u.unique_table_stats().size, 0);
    }

    // With terminals only there are no internal child references, so a
    // cell's strong count must equal the number of model handles exactly.
    #[test]
    fn terminal_refcount_conservation(ops in proptest::collection::vec(0u8..3, 1..100)) {
        let u = Unicity::<SimpleDD>::new(4);
        let mut live: Vec<DD> = Vec::new();

        for op in ops {
            match op {
                0 => live.push(u.make(One)),
                1 => {
                    if let Some(h) = live.last() {
                        let h = h.clone();
                        live.push(h);
                    }
                }
                _ => {
                    live.pop();
                }
            }

            if let Some(h) = live.first() {
                prop_assert_eq!(h.strong_count() as usize, live.len());
            }
            let expected = usize::from(!live.is_empty());
            prop_assert_eq!(u.unique_table_stats().size, expected);
        }
    }
}
