//! Caller-observable error conditions.
//!
//! Most invariant violations in this crate (see the module docs on
//! [`crate::decision`] and [`crate::scheduler`]) are bugs in the driver, not
//! recoverable conditions, and are reported with `panic!`/`debug_assert!`
//! rather than a `Result`. The variants here are the exceptions: conditions
//! a misbehaving-but-not-memory-unsafe driver can trigger at a clean API
//! boundary.

/// Errors a [`crate::scheduler::Scheduler`] implementation can report.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A [`crate::scheduler::WorkerToken`] was presented that does not index
    /// into this scheduler's worker set.
    #[error("worker token {0} is out of range for this scheduler")]
    InvalidWorkerToken(usize),
    /// `enqueue` was called after [`crate::scheduler::Scheduler::halt`].
    #[error("enqueue attempted after scheduler halt")]
    AlreadyHalted,
}
