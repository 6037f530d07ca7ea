//! Property-based tests for the pointer family.
//!
//! Random operation sequences are replayed against a simple model of the
//! strong and weak counters.

use ntsp::{LocalShared, LocalWeak, SharedPointer};
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

struct Probe(Rc<Cell<usize>>);

impl Drop for Probe {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[derive(Debug, Clone)]
enum Op {
    CloneStrong(usize),
    DropStrong(usize),
    TakeStrong(usize),
    Downgrade(usize),
    DropWeak(usize),
    LockWeak(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..16).prop_map(Op::CloneStrong),
        (0usize..16).prop_map(Op::DropStrong),
        (0usize..16).prop_map(Op::TakeStrong),
        (0usize..16).prop_map(Op::Downgrade),
        (0usize..16).prop_map(Op::DropWeak),
        (0usize..16).prop_map(Op::LockWeak),
    ]
}

fn pick<T>(items: &[T], index: usize) -> Option<usize> {
    if items.is_empty() {
        None
    } else {
        Some(index % items.len())
    }
}

fn live_strong(strong: &[LocalShared<Probe>]) -> usize {
    strong.iter().filter(|s| s.has_value()).count()
}

proptest! {
    /// Counters always match the number of live handles
    #[test]
    fn counters_track_handles(
        monotonic in any::<bool>(),
        ops in prop::collection::vec(op(), 0..64),
    ) {
        let drops = Rc::new(Cell::new(0));
        let first: LocalShared<Probe> = if monotonic {
            SharedPointer::make(Probe(Rc::clone(&drops)))
        } else {
            SharedPointer::from_box(Box::new(Probe(Rc::clone(&drops))))
        };
        let mut strong = vec![first];
        let mut weak: Vec<LocalWeak<Probe>> = Vec::new();

        for op in ops {
            match op {
                Op::CloneStrong(i) => {
                    if let Some(i) = pick(&strong, i) {
                        let copy = strong[i].clone();
                        strong.push(copy);
                    }
                }
                Op::DropStrong(i) => {
                    if let Some(i) = pick(&strong, i) {
                        strong.swap_remove(i);
                    }
                }
                Op::TakeStrong(i) => {
                    if let Some(i) = pick(&strong, i) {
                        let moved = strong[i].take();
                        strong.push(moved);
                    }
                }
                Op::Downgrade(i) => {
                    if let Some(i) = pick(&strong, i) {
                        if strong[i].has_value() {
                            weak.push(strong[i].downgrade());
                        }
                    }
                }
                Op::DropWeak(i) => {
                    if let Some(i) = pick(&weak, i) {
                        weak.swap_remove(i);
                    }
                }
                Op::LockWeak(i) => {
                    if let Some(i) = pick(&weak, i) {
                        let locked = weak[i].lock();
                        prop_assert_eq!(locked.is_empty(), live_strong(&strong) == 0);
                        if locked.has_value() {
                            strong.push(locked);
                        }
                    }
                }
            }

            let live = live_strong(&strong);
            prop_assert_eq!(drops.get(), usize::from(live == 0));
            if let Some(owner) = strong.iter().find(|s| s.has_value()) {
                prop_assert_eq!(owner.strong_count(), live);
                prop_assert_eq!(owner.weak_count(), weak.len());
            }
            for observer in &weak {
                prop_assert_eq!(observer.expired(), live == 0);
                prop_assert_eq!(observer.weak_count(), weak.len());
            }
        }

        drop(strong);
        prop_assert_eq!(drops.get(), 1);
        drop(weak);
    }

    /// Copies always compare equal to their source and unequal to other blocks
    #[test]
    fn identity_follows_block(values in prop::collection::vec(any::<i64>(), 1..16)) {
        let pointers: Vec<LocalShared<i64>> =
            values.iter().map(|&v| SharedPointer::make(v)).collect();

        for (i, a) in pointers.iter().enumerate() {
            let copy = a.clone();
            prop_assert!(copy == *a);
            prop_assert_eq!(*copy, values[i]);
            for (j, b) in pointers.iter().enumerate() {
                prop_assert_eq!(a == b, i == j);
            }
        }
    }
}
