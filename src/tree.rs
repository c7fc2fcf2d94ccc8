//! The decision tree itself: owns a [`Scheduler`], builds root/child/sibling
//! nodes, and walks ancestors on the trace builder's behalf.

use std::sync::Arc;

use crate::decision::DecisionNode;
use crate::error::SchedulerError;
use crate::graph::SaturatedGraph;
use crate::scheduler::{Scheduler, WorkerToken};
use crate::unfolding::UnfoldingNode;
use crate::branch::Leaf;

/// Owns a [`Scheduler`] and the decision tree's root. A worker's loop is
/// `get_next_work_task` → run the trace builder → `new_decision_node` (to
/// continue) and/or `construct_sibling` (to fork an alternative) → repeat.
pub struct DecisionTree<C, G, Sym> {
    scheduler: Box<dyn Scheduler<C, G, Sym>>,
    root: Arc<DecisionNode<C, G, Sym>>,
}

impl<C, G, Sym> DecisionTree<C, G, Sym>
where
    G: SaturatedGraph,
{
    /// Takes ownership of `scheduler` and enqueues a freshly built root node
    /// (depth -1) using [`WorkerToken::INITIAL`], since tree construction
    /// happens before any worker has registered.
    pub fn new(scheduler: Box<dyn Scheduler<C, G, Sym>>) -> Self {
        let root = DecisionNode::root();
        scheduler
            .enqueue(WorkerToken::INITIAL, Arc::clone(&root))
            .expect("enqueueing the root node must not fail");
        Self { scheduler, root }
    }

    pub fn root(&self) -> &Arc<DecisionNode<C, G, Sym>> {
        &self.root
    }

    pub fn register_thread(&self) -> WorkerToken {
        self.scheduler.register_thread()
    }

    /// Dequeues the next decision node to explore, or `Ok(None)` if the
    /// scheduler has been halted.
    pub fn get_next_work_task(
        &self,
        token: WorkerToken,
    ) -> Result<Option<Arc<DecisionNode<C, G, Sym>>>, SchedulerError> {
        self.scheduler.dequeue(token)
    }

    /// Constructs a child of `parent` continuing the currently executing
    /// branch and registers `unf` as allocated to it. Does **not** enqueue —
    /// the caller already holds this node as a continuation of work in hand.
    pub fn new_decision_node(
        &self,
        parent: &Arc<DecisionNode<C, G, Sym>>,
        unf: Arc<UnfoldingNode<C>>,
    ) -> Arc<DecisionNode<C, G, Sym>> {
        let decision = DecisionNode::new_child(parent);
        decision.alloc_unf(unf);
        decision
    }

    /// Builds a sibling of `decision` for a newly discovered alternative
    /// read-from and makes it available to any worker by enqueueing it onto
    /// `token`'s queue.
    pub fn construct_sibling(
        &self,
        token: WorkerToken,
        decision: &Arc<DecisionNode<C, G, Sym>>,
        unf: Arc<UnfoldingNode<C>>,
        leaf: Leaf<Sym>,
    ) -> Result<(), SchedulerError> {
        let sibling = decision.make_sibling(unf, leaf);
        self.scheduler.enqueue(token, sibling)
    }

    /// Returns the ancestor of `node` at depth `wanted`. Precondition:
    /// `node.depth() >= wanted`. Short-circuits to `node` itself when already
    /// at the wanted depth, so `find_ancestor(root, -1)` returns the root
    /// without ever needing a parent pointer.
    pub fn find_ancestor(
        node: &Arc<DecisionNode<C, G, Sym>>,
        wanted: i64,
    ) -> Arc<DecisionNode<C, G, Sym>> {
        debug_assert!(node.depth() >= wanted, "find_ancestor requires node.depth() >= wanted");
        if node.depth() == wanted {
            return Arc::clone(node);
        }
        DecisionNode::get_ancestor(node, wanted)
    }

    pub fn halt(&self) {
        self.scheduler.halt();
    }

    pub fn outstanding_jobs(&self) -> u64 {
        self.scheduler.outstanding_jobs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PriorityQueueScheduler;
    use crate::unfolding::UnfoldingTree;

    #[derive(Clone, Default)]
    struct NoopGraph;
    impl SaturatedGraph for NoopGraph {
        fn size(&self) -> usize {
            0
        }
    }

    type Tree = DecisionTree<u32, NoopGraph, ()>;

    #[test]
    fn root_is_immediately_available_then_halt_stops_dequeue() {
        let tree: Tree = DecisionTree::new(Box::new(PriorityQueueScheduler::new()));
        let token = tree.register_thread();

        let task = tree.get_next_work_task(token).unwrap();
        assert_eq!(task.unwrap().depth(), -1);

        tree.halt();
        assert!(tree.get_next_work_task(token).unwrap().is_none());
    }

    #[test]
    fn new_decision_node_does_not_enqueue() {
        let tree: Tree = DecisionTree::new(Box::new(PriorityQueueScheduler::new()));
        let token = tree.register_thread();
        let root = tree.get_next_work_task(token).unwrap().unwrap();

        let unf_tree: UnfoldingTree<u32> = UnfoldingTree::new();
        let unf = unf_tree.find_unfolding_node(&1, None, None);
        let child = tree.new_decision_node(&root, unf);
        assert_eq!(child.depth(), 0);

        // nothing else was enqueued besides the root we already drained
        assert!(tree.get_next_work_task(token).is_ok());
    }

    #[test]
    fn construct_sibling_enqueues_and_is_dequeueable() {
        let tree: Tree = DecisionTree::new(Box::new(PriorityQueueScheduler::new()));
        let token = tree.register_thread();
        let root = tree.get_next_work_task(token).unwrap().unwrap();

        let unf_tree: UnfoldingTree<u32> = UnfoldingTree::new();
        let unf = unf_tree.find_unfolding_node(&1, None, None);
        let child = tree.new_decision_node(&root, unf);

        let unf2 = unf_tree.find_unfolding_node(&1, None, None);
        tree.construct_sibling(token, &child, unf2, Leaf::bottom()).unwrap();

        let task = tree.get_next_work_task(token).unwrap().unwrap();
        assert_eq!(task.depth(), child.depth());
    }

    #[test]
    fn find_ancestor_at_own_depth_is_identity() {
        let root = DecisionNode::<u32, NoopGraph, ()>::root();
        let found = Tree::find_ancestor(&root, -1);
        assert!(Arc::ptr_eq(&found, &root));
    }

    #[test]
    fn find_ancestor_walks_up_the_chain() {
        let root = DecisionNode::<u32, NoopGraph, ()>::root();
        let n1 = DecisionNode::new_child(&root);
        let n2 = DecisionNode::new_child(&n1);
        let n3 = DecisionNode::new_child(&n2);

        let found = Tree::find_ancestor(&n3, 0);
        assert!(Arc::ptr_eq(&found, &n1));
    }
}
