//! The unfolding tree: content-addressed interning of event-structure nodes,
//! de-duplicated across threads by `(cpid, parent, read_from)` identity.
//!
//! Node shape follows this pack's `tree-struct` crate's `rc`/`arc` module
//! (`Arc<RwLock<Inner>>` with a `Weak` back-link), generalized so that a
//! **parent** holds *weak* references to its children instead of the other
//! way around — dropped decision paths must not pin unfolding state alive.

use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A globally-unique, cheaply-generated sequence number.
///
/// Composed of a thread-local "root" value (handed out once per thread from
/// a single global counter) and a counter local to that thread, so ordinary
/// node creation never touches shared atomic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqno(u64);

static SEQNO_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static SEQNO_ROOT: u64 = SEQNO_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    static SEQNO_LOCAL: Cell<u32> = const { Cell::new(0) };
}

impl Seqno {
    fn next() -> Self {
        let root = SEQNO_ROOT.with(|r| *r);
        let local = SEQNO_LOCAL.with(|c| {
            let v = c.get();
            c.set(v + 1);
            v
        });
        Seqno((root << 32) | (local as u64))
    }
}

/// An interned event of the prime event structure.
///
/// Identity is `(cpid, parent, read_from)`: two nodes with the same parent
/// and the same `read_from` (compared by pointer equality, not content) are
/// the same node. `cpid` only matters for *root* nodes (`parent.is_none()`),
/// where it selects which root bucket to search.
pub struct UnfoldingNode<C> {
    parent: Option<Arc<UnfoldingNode<C>>>,
    read_from: Option<Arc<UnfoldingNode<C>>>,
    children: Mutex<Vec<Weak<UnfoldingNode<C>>>>,
    seqno: Seqno,
    _cpid: std::marker::PhantomData<C>,
}

impl<C> UnfoldingNode<C> {
    fn new(
        parent: Option<Arc<UnfoldingNode<C>>>,
        read_from: Option<Arc<UnfoldingNode<C>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            parent,
            read_from,
            children: Mutex::new(Vec::new()),
            seqno: Seqno::next(),
            _cpid: std::marker::PhantomData,
        })
    }

    pub fn parent(&self) -> Option<&Arc<UnfoldingNode<C>>> {
        self.parent.as_ref()
    }

    pub fn read_from(&self) -> Option<&Arc<UnfoldingNode<C>>> {
        self.read_from.as_ref()
    }

    pub fn seqno(&self) -> Seqno {
        self.seqno
    }
}

/// Scan `list` for a live child whose `read_from` matches by pointer
/// equality, compacting dead weak entries (swap-and-pop) as we go. Creates
/// and appends a new node on a miss. A `read_from` match is asserted to
/// always agree on `parent` too, since identity is the pair of them together.
fn get_or_create<C>(
    list: &mut Vec<Weak<UnfoldingNode<C>>>,
    parent: &Option<Arc<UnfoldingNode<C>>>,
    read_from: &Option<Arc<UnfoldingNode<C>>>,
) -> Arc<UnfoldingNode<C>> {
    let mut ci = 0;
    while ci < list.len() {
        let Some(c) = list[ci].upgrade() else {
            let last = list.len() - 1;
            list.swap(ci, last);
            list.pop();
            continue;
        };
        if same_opt(c.read_from(), read_from.as_ref()) {
            debug_assert!(
                same_opt(c.parent(), parent.as_ref()),
                "unfolding node with matching read_from but differing parent"
            );
            return c;
        }
        ci += 1;
    }

    let node = UnfoldingNode::new(parent.clone(), read_from.clone());
    list.push(Arc::downgrade(&node));
    node
}

fn same_opt<C>(a: Option<&Arc<UnfoldingNode<C>>>, b: Option<&Arc<UnfoldingNode<C>>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

struct RootBucket<C> {
    children: Mutex<Vec<Weak<UnfoldingNode<C>>>>,
}

impl<C> Default for RootBucket<C> {
    fn default() -> Self {
        Self {
            children: Mutex::new(Vec::new()),
        }
    }
}

/// Interns [`UnfoldingNode`]s for a process; the single entry point is
/// [`UnfoldingTree::find_unfolding_node`].
pub struct UnfoldingTree<C> {
    roots: RwLock<HashMap<C, RootBucket<C>>>,
}

impl<C: Eq + Hash + Clone> Default for UnfoldingTree<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Eq + Hash + Clone> UnfoldingTree<C> {
    pub fn new() -> Self {
        Self {
            roots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the unique unfolding node with identity `(cpid, parent,
    /// read_from)`, creating it if absent.
    ///
    /// If `parent` is present, the lookup happens under `parent`'s own
    /// child-list mutex. Otherwise it happens under the root bucket for
    /// `cpid`, found via a read-locked lookup with a write-locked fallback
    /// to insert a never-before-seen `cpid`.
    pub fn find_unfolding_node(
        &self,
        cpid: &C,
        parent: Option<Arc<UnfoldingNode<C>>>,
        read_from: Option<Arc<UnfoldingNode<C>>>,
    ) -> Arc<UnfoldingNode<C>> {
        match &parent {
            Some(p) => {
                let mut children = p.children.lock();
                get_or_create(&mut children, &parent, &read_from)
            }
            None => {
                {
                    let roots = self.roots.read();
                    if let Some(bucket) = roots.get(cpid) {
                        let mut children = bucket.children.lock();
                        return get_or_create(&mut children, &parent, &read_from);
                    }
                }
                let mut roots = self.roots.write();
                let bucket = roots.entry(cpid.clone()).or_default();
                let mut children = bucket.children.lock();
                get_or_create(&mut children, &parent, &read_from)
            }
        }
    }
}
