//! A node in the decision tree: a commitment to a particular read-from (or
//! the root). Node shape follows this pack's `tree-struct` crate's `rc`
//! module (`Arc<RwLock<Inner>>` with a `Weak` parent link), adapted so that
//! children hold *strong* references to their parent and a parent never
//! references its children at all — the decision tree is a pure
//! shared-ownership tree, unlike the unfolding tree's weak-child variant.
//!
//! `try_alloc_unf`/`alloc_unf`/`get_saturated_graph` implement the exact
//! double-checked-locking sequence and acquire/release pairing around
//! `cache_initialised` described in the module docs below.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::branch::Leaf;
use crate::graph::SaturatedGraph;
use crate::sync_shim::{AtomicBool, Ordering};
use crate::unfolding::UnfoldingNode;

/// Wraps an `Arc<UnfoldingNode<C>>` so it can live in a `HashSet` keyed by
/// pointer identity rather than by any `Eq`/`Hash` impl on `C` or the node's
/// contents — two allocations of the same unfolding node are the same
/// allocation, nothing else is.
struct UnfPtr<C>(Arc<UnfoldingNode<C>>);

impl<C> Clone for UnfPtr<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
impl<C> PartialEq for UnfPtr<C> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl<C> Eq for UnfPtr<C> {}
impl<C> Hash for UnfPtr<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const ()).hash(state)
    }
}

/// State a node holds on behalf of its children, all behind one mutex:
/// `children_unf_set` and `graph_cache` are only ever touched together,
/// under their parent's lock.
struct Shared<C, G> {
    children_unf_set: HashSet<UnfPtr<C>>,
    graph_cache: G,
}

impl<C, G: SaturatedGraph> Shared<C, G> {
    fn new() -> Self {
        Self {
            children_unf_set: HashSet::new(),
            graph_cache: G::default(),
        }
    }
}

/// A node in the decision tree. See the module docs for its shared-ownership
/// and locking discipline.
pub struct DecisionNode<C, G, Sym> {
    depth: i64,
    parent: Option<Arc<DecisionNode<C, G, Sym>>>,
    unfold_node: Option<Arc<UnfoldingNode<C>>>,
    leaf: Leaf<Sym>,
    pruned_subtree: AtomicBool,
    cache_initialised: AtomicBool,
    shared: Mutex<Shared<C, G>>,
}

impl<C, G: SaturatedGraph, Sym> DecisionNode<C, G, Sym> {
    /// The root sentinel: `depth == -1`, cache trivially initialised to the
    /// empty graph so the ancestor walk in [`Self::get_saturated_graph`]
    /// always terminates.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            depth: -1,
            parent: None,
            unfold_node: None,
            leaf: Leaf::bottom(),
            pruned_subtree: AtomicBool::new(false),
            cache_initialised: AtomicBool::new(true),
            shared: Mutex::new(Shared::new()),
        })
    }

    /// Constructs a child of `parent` at `parent.depth() + 1`. Does not
    /// register an unfolding node; callers that are continuing a trace
    /// (rather than forking a sibling) call [`Self::alloc_unf`] on the
    /// result themselves (see [`crate::tree::DecisionTree::new_decision_node`]).
    pub(crate) fn new_child(parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            depth: parent.depth + 1,
            parent: Some(Arc::clone(parent)),
            unfold_node: None,
            leaf: Leaf::bottom(),
            pruned_subtree: AtomicBool::new(false),
            cache_initialised: AtomicBool::new(false),
            shared: Mutex::new(Shared::new()),
        })
    }

    /// Constructs a sibling of `self`: shares `self.parent` and therefore
    /// lands at `self.parent.depth + 1 == self.depth` — siblings always sit
    /// at the same depth as the node they were branched from.
    pub fn make_sibling(&self, unf: Arc<UnfoldingNode<C>>, leaf: Leaf<Sym>) -> Arc<Self> {
        let parent = self.parent.clone().expect("make_sibling called on the root node");
        Arc::new(Self {
            depth: parent.depth + 1,
            parent: Some(parent),
            unfold_node: Some(unf),
            leaf,
            pruned_subtree: AtomicBool::new(false),
            cache_initialised: AtomicBool::new(false),
            shared: Mutex::new(Shared::new()),
        })
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    pub fn unfold_node(&self) -> Option<&Arc<UnfoldingNode<C>>> {
        self.unfold_node.as_ref()
    }

    pub fn leaf(&self) -> &Leaf<Sym> {
        &self.leaf
    }

    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Attempts to record `unf` as allocated to some child of `self.parent`.
    /// Returns whether the insertion was new; a `false` return means some
    /// other (or earlier) sibling already claimed this unfolding node, and
    /// the caller should not enqueue a duplicate.
    pub fn try_alloc_unf(&self, unf: &Arc<UnfoldingNode<C>>) -> bool {
        let parent = self.parent.as_ref().expect("try_alloc_unf called on the root node");
        parent.shared.lock().children_unf_set.insert(UnfPtr(Arc::clone(unf)))
    }

    /// Same as [`Self::try_alloc_unf`], but asserts the allocation is new.
    /// Used when the caller has already proved `unf` was absent (e.g. it was
    /// just created by the unfolding tree).
    pub fn alloc_unf(&self, unf: Arc<UnfoldingNode<C>>) {
        let inserted = self.try_alloc_unf(&unf);
        debug_assert!(inserted, "unfolding node allocated twice under the same parent");
    }

    /// Returns the saturated graph representing all events up to
    /// `self.parent`, building it lazily via double-checked locking if
    /// necessary. `construct` extends whatever graph was cloned from the
    /// nearest initialised ancestor with the events between that ancestor
    /// and `self`.
    ///
    /// Panics if called on the root (the root has no parent whose cache to
    /// build).
    pub fn get_saturated_graph(&self, construct: impl FnOnce(&mut G)) -> G {
        let parent = self.parent.as_ref().expect("get_saturated_graph called on the root node");

        if parent.cache_initialised.load(Ordering::Acquire) {
            let g = parent.shared.lock().graph_cache.clone();
            debug_assert!(g.size() > 0 || self.depth == 0);
            return g;
        }

        let mut shared = parent.shared.lock();
        if parent.cache_initialised.load(Ordering::Relaxed) {
            let g = shared.graph_cache.clone();
            debug_assert!(g.size() > 0 || self.depth == 0);
            return g;
        }

        debug_assert!(self.depth > 0 && shared.graph_cache.size() == 0);

        let mut node = Arc::clone(parent);
        let mut steps = 0u32;
        loop {
            if node.cache_initialised.load(Ordering::Acquire) {
                shared.graph_cache = node.shared.lock().graph_cache.clone();
                break;
            }
            node = node.parent.clone().expect("root cache is always initialised");
            steps += 1;
        }
        log::trace!(
            "building graph cache for depth {} by cloning ancestor at depth {} ({} steps up the spine)",
            parent.depth,
            node.depth,
            steps
        );

        construct(&mut shared.graph_cache);
        parent.cache_initialised.store(true, Ordering::Release);
        shared.graph_cache.clone()
    }

    /// Marks this subtree (and therefore every current and future
    /// descendant) as pruned. Idempotent.
    pub fn prune_decisions(&self) {
        log::debug!("pruning subtree rooted at decision depth {}", self.depth);
        self.pruned_subtree.store(true, Ordering::Release);
    }

    /// True if `self` or any ancestor (excluding the root) is pruned.
    pub fn is_pruned(&self) -> bool {
        let mut node = self;
        while node.depth != -1 {
            if node.pruned_subtree.load(Ordering::Acquire) {
                return true;
            }
            node = node.parent.as_deref().expect("non-root decision node missing a parent");
        }
        false
    }

    /// Walks `parent` pointers from `node` until one is found at depth
    /// `wanted`. Precondition: `node.depth() > wanted` (equality is handled
    /// by [`crate::tree::DecisionTree::find_ancestor`] without calling this).
    pub(crate) fn get_ancestor(node: &Arc<Self>, wanted: i64) -> Arc<Self> {
        let mut node = Arc::clone(node);
        loop {
            let parent = node.parent.clone().expect("ancestor walk ran past the root");
            if parent.depth == wanted {
                return parent;
            }
            node = parent;
        }
    }
}
