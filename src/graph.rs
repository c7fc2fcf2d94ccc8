//! The saturated-graph type is owned by an external collaborator (the
//! happens-before graph constructor, built from a path of decisions). This
//! crate only needs two capabilities from it: cheap value-semantic cloning,
//! and a `size()` probe used by a couple of debug assertions.

/// Capability bound for the opaque "saturated graph" type a driver plugs
/// into [`crate::decision::DecisionNode::get_saturated_graph`].
///
/// Implementations must make `clone()` deterministic and reasonably cheap:
/// [`crate::decision::DecisionNode`] caches graphs by cloning from the
/// nearest initialised ancestor along the decision-tree spine, and that cost
/// is paid on every cache miss. `default()` must return the empty graph: it
/// seeds the root decision node's cache, which is trivially initialised to
/// empty and never runs through `construct`.
pub trait SaturatedGraph: Clone + Default + Send + Sync {
    /// Number of events currently recorded in the graph.
    fn size(&self) -> usize;
}
