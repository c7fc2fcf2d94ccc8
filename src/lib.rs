//! Exploration engine for a stateless model checker under weak memory
//! models: a **decision tree** (with a pluggable [`Scheduler`]) paired with
//! an **unfolding tree** (content-addressed de-duplication of event-structure
//! nodes).
//!
//! This crate is deliberately narrow. It owns just those two data structures
//! and nothing else: no trace replay, no memory-model semantics, no race
//! detection. Those are external collaborators, threaded through as generic
//! parameters (`C` for `CPid`, `G` for the saturated-graph type, `Sym` for
//! the symbolic event type) or plain closures (the graph-construction
//! callback).

mod branch;
mod decision;
mod error;
mod graph;
mod scheduler;
mod sync_shim;
mod tree;
mod unfolding;

pub use branch::{Branch, Leaf};
pub use decision::DecisionNode;
pub use error::SchedulerError;
pub use graph::SaturatedGraph;
pub use scheduler::{PriorityQueueScheduler, Scheduler, WorkStealingScheduler, WorkerToken};
pub use tree::DecisionTree;
pub use unfolding::{Seqno, UnfoldingNode, UnfoldingTree};
