//! Swaps the atomics whose acquire/release ordering this crate depends on for
//! exact correctness for their `loom` equivalents when model-checking under
//! `--cfg loom`.
//!
//! Everywhere else in this crate uses `parking_lot` directly, since `loom`
//! has no model for it; only [`AtomicBool`] is routed through here, because
//! it is the primitive whose acquire/release pairing the `loom`-gated tests
//! in `tests/loom_cache_init.rs` exist to check.
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub use loom::sync::atomic::{AtomicBool, Ordering};
    } else {
        pub use std::sync::atomic::{AtomicBool, Ordering};
    }
}
