//! Cross-thread release tests
//!
//! Every scenario checks that the value is dropped exactly once, no matter
//! which thread releases the last strong or weak reference.

use ntsp::{SharedPointer, SyncShared, SyncWeak};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

struct Counted {
    id: usize,
    drops: Arc<AtomicUsize>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn counted(id: usize, drops: &Arc<AtomicUsize>) -> Counted {
    Counted {
        id,
        drops: Arc::clone(drops),
    }
}

#[test]
fn test_parallel_strong_release() {
    let drops = Arc::new(AtomicUsize::new(0));

    for round in 0..ROUNDS {
        let shared: SyncShared<Counted> = SharedPointer::make(counted(round, &drops));
        let copies: Vec<_> = (0..THREADS).map(|_| shared.clone()).collect();
        drop(shared);

        crossbeam::scope(|s| {
            for copy in copies {
                s.spawn(move |_| {
                    assert_eq!(copy.id, round);
                    drop(copy);
                });
            }
        })
        .unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), round + 1);
    }
}

#[test]
fn test_parallel_clone_and_release() {
    let drops = Arc::new(AtomicUsize::new(0));
    let shared: SyncShared<Counted> = SharedPointer::from_box(Box::new(counted(0, &drops)));

    crossbeam::scope(|s| {
        for _ in 0..THREADS {
            let local = shared.clone();
            s.spawn(move |_| {
                for _ in 0..1000 {
                    let copy = local.clone();
                    assert_eq!(copy.id, 0);
                }
            });
        }
    })
    .unwrap();

    assert_eq!(shared.strong_count(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(shared);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_strong_and_weak_race() {
    let drops = Arc::new(AtomicUsize::new(0));

    for round in 0..ROUNDS {
        let shared: SyncShared<Counted> = SharedPointer::make(counted(round, &drops));
        let weak: SyncWeak<Counted> = shared.downgrade();

        // Last strong and last weak released at the same time
        crossbeam::scope(|s| {
            s.spawn(move |_| drop(shared));
            s.spawn(move |_| drop(weak));
        })
        .unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), round + 1);
    }
}

#[test]
fn test_lock_during_release() {
    let drops = Arc::new(AtomicUsize::new(0));
    let observed = Mutex::new(Vec::new());

    for round in 0..ROUNDS {
        let shared: SyncShared<Counted> = SharedPointer::make(counted(round, &drops));
        let weaks: Vec<SyncWeak<Counted>> = (0..THREADS).map(|_| shared.downgrade()).collect();

        crossbeam::scope(|s| {
            s.spawn(move |_| drop(shared));
            for weak in weaks {
                let observed = &observed;
                s.spawn(move |_| {
                    let locked = weak.lock();
                    if let Some(value) = locked.get() {
                        // A successful lock always sees a live value
                        observed.lock().push(value.id);
                    } else {
                        assert!(weak.expired());
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), round + 1);
    }

    let observed = observed.into_inner();
    assert!(observed.iter().all(|&id| id < ROUNDS));
}

#[test]
fn test_weak_clones_across_threads() {
    let drops = Arc::new(AtomicUsize::new(0));
    let shared: SyncShared<Counted> = SharedPointer::make(counted(1, &drops));
    let weak = shared.downgrade();

    crossbeam::scope(|s| {
        for _ in 0..THREADS {
            let weak = weak.clone();
            s.spawn(move |_| {
                for _ in 0..500 {
                    let again = weak.clone();
                    assert!(!again.expired());
                }
            });
        }
    })
    .unwrap();

    assert_eq!(shared.weak_count(), 1);
    drop(shared);
    assert!(weak.expired());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
