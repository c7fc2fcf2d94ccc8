//! Model-checks the double-checked-locking protocol that
//! `DecisionNode::get_saturated_graph` and `DecisionNode::prune_decisions`/
//! `is_pruned` rely on: an `AtomicBool` flag written with `Release` and read
//! with `Acquire`, guarding a one-time write to shared state under a mutex.
//!
//! `DecisionNode` itself is built on `parking_lot`, which loom cannot
//! instrument, so this test reproduces the exact flag/mutex shape in
//! isolation with `loom`'s own primitives and checks that every interleaving
//! loom explores either observes the flag unset (and takes the lock) or
//! observes it set (and sees the published value): a relaxed ordering on
//! either side of this pair would let a reader observe the flag set while
//! still seeing the pre-initialisation value underneath the lock.
//!
//! Only runs under `cargo test --cfg loom` (or `RUSTFLAGS="--cfg loom"`);
//! ordinary `cargo test` skips this file's content entirely.

#![cfg(loom)]

use loom::sync::atomic::{AtomicBool, Ordering};
use loom::sync::Mutex;
use loom::thread;

struct CachedValue {
    initialised: AtomicBool,
    value: Mutex<u64>,
}

impl CachedValue {
    fn new() -> Self {
        Self {
            initialised: AtomicBool::new(false),
            value: Mutex::new(0),
        }
    }

    /// Mirrors `DecisionNode::get_saturated_graph`'s double-checked read.
    fn get_or_init(&self, init: impl FnOnce() -> u64) -> u64 {
        if self.initialised.load(Ordering::Acquire) {
            return *self.value.lock().unwrap();
        }
        let mut guard = self.value.lock().unwrap();
        if self.initialised.load(Ordering::Relaxed) {
            return *guard;
        }
        *guard = init();
        self.initialised.store(true, Ordering::Release);
        *guard
    }
}

#[test]
fn concurrent_readers_observe_a_consistent_value() {
    loom::model(|| {
        let cached = loom::sync::Arc::new(CachedValue::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cached = cached.clone();
                thread::spawn(move || cached.get_or_init(|| 42))
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
    });
}

struct PruneFlag {
    pruned: AtomicBool,
}

#[test]
fn prune_is_visible_to_a_concurrent_reader_after_release_store() {
    loom::model(|| {
        let flag = loom::sync::Arc::new(PruneFlag {
            pruned: AtomicBool::new(false),
        });

        let writer = {
            let flag = flag.clone();
            thread::spawn(move || {
                flag.pruned.store(true, Ordering::Release);
            })
        };

        writer.join().unwrap();
        // After the writer has joined (a happens-before edge in its own
        // right), every subsequent acquire-load must see the write.
        assert!(flag.pruned.load(Ordering::Acquire));
    });
}
