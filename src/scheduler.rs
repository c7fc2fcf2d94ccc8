//! The two schedulers that feed work to the decision tree's workers: a
//! single-lock deepest-first priority queue, and a per-worker work-stealing
//! queue. Both implement the [`Scheduler`] trait so [`crate::tree::DecisionTree`]
//! can be built with either behind one trait object; the dispatch overhead of
//! going through the trait object is negligible next to the trace-builder
//! work a caller does per dequeue.
//!
//! The lock/condvar pairing idiom (a `parking_lot::Condvar` guarded by its
//! own small mutex, checked in a loop rather than trusted on a single wake)
//! follows this pack's `skytable-skytable` sibling repo's `Cvar` wrapper.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use rand::seq::SliceRandom;

use crate::decision::DecisionNode;
use crate::error::SchedulerError;
use crate::graph::SaturatedGraph;

/// An opaque handle to a worker's slot in a [`WorkStealingScheduler`],
/// minted by [`Scheduler::register_thread`]. Threading this through
/// `enqueue`/`dequeue` explicitly (instead of a hidden `thread_local`) means
/// a thread that never registers simply has no token to enqueue with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerToken(pub(crate) usize);

impl WorkerToken {
    /// The token used for the root enqueue at tree construction time, which
    /// happens before any worker has registered.
    pub const INITIAL: WorkerToken = WorkerToken(0);
}

/// A source of decision-tree work. `enqueue`/`dequeue` take an explicit
/// [`WorkerToken`] (see its docs); a caller that never calls
/// [`Self::register_thread`] can still use [`WorkerToken::INITIAL`].
pub trait Scheduler<C, G, Sym>: Send + Sync
where
    G: SaturatedGraph,
{
    /// Mints a fresh [`WorkerToken`] for the calling worker.
    fn register_thread(&self) -> WorkerToken;

    fn enqueue(&self, token: WorkerToken, node: Arc<DecisionNode<C, G, Sym>>) -> Result<(), SchedulerError>;

    /// Blocks until work is available or the scheduler is halted, in which
    /// case it returns `Ok(None)`.
    fn dequeue(&self, token: WorkerToken) -> Result<Option<Arc<DecisionNode<C, G, Sym>>>, SchedulerError>;

    /// Signals all current and future `dequeue` calls to return `Ok(None)`.
    fn halt(&self);

    /// Relaxed job counter; combine with queue state to draw conclusions.
    fn outstanding_jobs(&self) -> u64;
}

// ---------------------------------------------------------------------
// Priority-queue scheduler
// ---------------------------------------------------------------------

struct ByDepth<C, G, Sym>(Arc<DecisionNode<C, G, Sym>>);

impl<C, G, Sym> PartialEq for ByDepth<C, G, Sym> {
    fn eq(&self, other: &Self) -> bool {
        self.0.depth() == other.0.depth()
    }
}
impl<C, G, Sym> Eq for ByDepth<C, G, Sym> {}
impl<C, G, Sym> PartialOrd for ByDepth<C, G, Sym> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<C, G, Sym> Ord for ByDepth<C, G, Sym> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.depth().cmp(&other.0.depth())
    }
}

struct PqState<C, G, Sym> {
    queue: std::collections::BinaryHeap<ByDepth<C, G, Sym>>,
    halting: bool,
}

/// Deepest-first scheduler: a single mutex, a single condvar, and a max-heap
/// ordered by depth. Depth-first bias bounds the number of live nodes: once a
/// worker commits to a deep branch, finishing it releases references to
/// shallower ancestors' other children lazily.
pub struct PriorityQueueScheduler<C, G, Sym> {
    state: Mutex<PqState<C, G, Sym>>,
    cv: Condvar,
    outstanding_jobs: AtomicU64,
}

impl<C, G, Sym> PriorityQueueScheduler<C, G, Sym> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PqState {
                queue: std::collections::BinaryHeap::new(),
                halting: false,
            }),
            cv: Condvar::new(),
            outstanding_jobs: AtomicU64::new(0),
        }
    }
}

impl<C, G, Sym> Default for PriorityQueueScheduler<C, G, Sym> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, G, Sym> Scheduler<C, G, Sym> for PriorityQueueScheduler<C, G, Sym>
where
    C: Send + Sync,
    G: SaturatedGraph,
    Sym: Send + Sync,
{
    fn register_thread(&self) -> WorkerToken {
        // A single shared queue needs no per-worker identity.
        WorkerToken::INITIAL
    }

    fn enqueue(&self, _token: WorkerToken, node: Arc<DecisionNode<C, G, Sym>>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.halting {
            return Err(SchedulerError::AlreadyHalted);
        }
        self.outstanding_jobs.fetch_add(1, Ordering::Relaxed);
        state.queue.push(ByDepth(node));
        self.cv.notify_one();
        Ok(())
    }

    fn dequeue(&self, _token: WorkerToken) -> Result<Option<Arc<DecisionNode<C, G, Sym>>>, SchedulerError> {
        let mut state = self.state.lock();
        loop {
            if state.halting {
                return Ok(None);
            }
            if let Some(ByDepth(node)) = state.queue.pop() {
                return Ok(Some(node));
            }
            self.cv.wait(&mut state);
        }
    }

    fn halt(&self) {
        log::debug!("halting priority-queue scheduler");
        let mut state = self.state.lock();
        state.halting = true;
        self.cv.notify_all();
    }

    fn outstanding_jobs(&self) -> u64 {
        self.outstanding_jobs.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------
// Work-stealing scheduler
// ---------------------------------------------------------------------

type DepthBuckets<C, G, Sym> = BTreeMap<i64, VecDeque<Arc<DecisionNode<C, G, Sym>>>>;

/// Pops the front of the deepest (largest-key) bucket, erasing the bucket if
/// it becomes empty. Mirrors `ThreadWorkQueue::pop`.
fn pop_deepest<C, G, Sym>(map: &mut DepthBuckets<C, G, Sym>) -> Option<Arc<DecisionNode<C, G, Sym>>> {
    let mut entry = map.last_entry()?;
    let bucket = entry.get_mut();
    let node = bucket.pop_front();
    if bucket.is_empty() {
        entry.remove();
    }
    node
}

/// Moves half of `victim`'s shallowest bucket (its deepest elements) into
/// `thief`'s same-depth bucket. Mirrors `ThreadWorkQueue::steal`: half of the
/// victim's *shallowest* bucket balances load (it has the most future-work
/// potential) while leaving the victim its own deepest, cache-hot work.
fn steal<C, G, Sym>(thief: &mut DepthBuckets<C, G, Sym>, victim: &mut DepthBuckets<C, G, Sym>) -> bool {
    debug_assert!(thief.is_empty());
    let Some(mut entry) = victim.first_entry() else {
        return false;
    };
    let depth = *entry.key();
    let bucket = entry.get_mut();
    let count = (bucket.len() + 1) / 2;
    debug_assert!(count > 0 && count <= bucket.len());

    let thief_bucket = thief.entry(depth).or_default();
    for _ in 0..count {
        let node = bucket.pop_back().expect("count bounded by bucket.len()");
        thief_bucket.push_front(node);
    }
    if bucket.is_empty() {
        entry.remove();
    }
    true
}

/// Locks queues `a` and `b` in a fixed index order regardless of which is
/// requested first, so two workers racing to steal from each other can never
/// deadlock on each other's mutex. Returns guards in `(a, b)` order.
fn lock_pair<C, G, Sym>(
    queues: &[CachePadded<Mutex<DepthBuckets<C, G, Sym>>>],
    a: usize,
    b: usize,
) -> (
    parking_lot::MutexGuard<'_, DepthBuckets<C, G, Sym>>,
    parking_lot::MutexGuard<'_, DepthBuckets<C, G, Sym>>,
) {
    if a < b {
        let ga = queues[a].lock();
        let gb = queues[b].lock();
        (ga, gb)
    } else {
        let gb = queues[b].lock();
        let ga = queues[a].lock();
        (ga, gb)
    }
}

/// Work-stealing scheduler: one depth-bucketed deque per worker. `push`
/// appends to the back of the matching depth bucket; `pop` always drains the
/// deepest bucket first, so a worker exhausts its own deepest work before
/// anyone steals from it or it steals from anyone else.
pub struct WorkStealingScheduler<C, G, Sym> {
    queues: Vec<CachePadded<Mutex<DepthBuckets<C, G, Sym>>>>,
    /// Guards only `halting`/the condvar itself; per-queue state lives under
    /// each entry in `queues`.
    mutex: Mutex<()>,
    cv: Condvar,
    halting: std::sync::atomic::AtomicBool,
    outstanding_jobs: AtomicU64,
    next_token: AtomicUsize,
}

impl<C, G, Sym> WorkStealingScheduler<C, G, Sym> {
    pub fn new(num_workers: usize) -> Self {
        assert!(num_workers > 0, "a work-stealing scheduler needs at least one worker");
        Self {
            queues: (0..num_workers).map(|_| CachePadded::new(Mutex::new(BTreeMap::new()))).collect(),
            mutex: Mutex::new(()),
            cv: Condvar::new(),
            halting: std::sync::atomic::AtomicBool::new(false),
            outstanding_jobs: AtomicU64::new(0),
            next_token: AtomicUsize::new(0),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }
}

impl<C, G, Sym> Scheduler<C, G, Sym> for WorkStealingScheduler<C, G, Sym>
where
    C: Send + Sync,
    G: SaturatedGraph,
    Sym: Send + Sync,
{
    fn register_thread(&self) -> WorkerToken {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        assert!(
            id < self.queues.len(),
            "register_thread called more times than this scheduler's configured worker count"
        );
        WorkerToken(id)
    }

    fn enqueue(&self, token: WorkerToken, node: Arc<DecisionNode<C, G, Sym>>) -> Result<(), SchedulerError> {
        let queue = self.queues.get(token.0).ok_or(SchedulerError::InvalidWorkerToken(token.0))?;
        if self.halting.load(Ordering::Relaxed) {
            return Err(SchedulerError::AlreadyHalted);
        }
        self.outstanding_jobs.fetch_add(1, Ordering::Relaxed);
        {
            let mut q = queue.lock();
            q.entry(node.depth()).or_default().push_back(node);
        }
        // Signals the *global* condvar, not a per-worker one, even though
        // only the caller's own queue's mutex was touched above. Parked
        // workers only ever wait on this condvar, so this is intentional,
        // if suboptimal: a per-queue condvar would let us wake only a
        // worker that could plausibly steal from the one just pushed to.
        self.cv.notify_one();
        Ok(())
    }

    fn dequeue(&self, token: WorkerToken) -> Result<Option<Arc<DecisionNode<C, G, Sym>>>, SchedulerError> {
        let own = self.queues.get(token.0).ok_or(SchedulerError::InvalidWorkerToken(token.0))?;

        {
            let mut q = own.lock();
            if self.halting.load(Ordering::Relaxed) {
                return Ok(None);
            }
            if let Some(node) = pop_deepest(&mut q) {
                return Ok(Some(node));
            }
        }

        let mut guard = self.mutex.lock();
        loop {
            if self.halting.load(Ordering::Relaxed) {
                return Ok(None);
            }
            if let Some(node) = pop_deepest(&mut own.lock()) {
                return Ok(Some(node));
            }

            let mut victims: Vec<usize> = (0..self.queues.len()).filter(|&i| i != token.0).collect();
            victims.shuffle(&mut rand::thread_rng());

            let mut did_steal = false;
            for victim in victims {
                let (mut own_q, mut victim_q) = lock_pair(&self.queues, token.0, victim);
                if steal(&mut own_q, &mut victim_q) {
                    log::trace!("worker {} stole work from worker {}", token.0, victim);
                    did_steal = true;
                    break;
                }
            }
            if did_steal {
                if let Some(node) = pop_deepest(&mut own.lock()) {
                    return Ok(Some(node));
                }
            }

            self.cv.wait(&mut guard);
        }
    }

    fn halt(&self) {
        log::debug!("halting work-stealing scheduler ({} workers)", self.queues.len());
        let _guard = self.mutex.lock();
        self.halting.store(true, Ordering::Relaxed);
        self.cv.notify_all();
    }

    fn outstanding_jobs(&self) -> u64 {
        self.outstanding_jobs.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SaturatedGraph;

    #[derive(Clone, Default)]
    struct NoopGraph;
    impl SaturatedGraph for NoopGraph {
        fn size(&self) -> usize {
            0
        }
    }

    type Node = DecisionNode<u32, NoopGraph, ()>;

    fn node_at_depth(root: &Arc<Node>, d: i64) -> Arc<Node> {
        let mut node = Arc::clone(root);
        while node.depth() < d {
            node = Node::new_child(&node);
        }
        node
    }

    fn chain(root: &Arc<Node>, depths: &[i64]) -> Vec<Arc<Node>> {
        depths.iter().map(|&d| node_at_depth(root, d)).collect()
    }

    #[test]
    fn pq_root_enqueue_then_halt() {
        let sched: PriorityQueueScheduler<u32, NoopGraph, ()> = PriorityQueueScheduler::new();
        let root = Node::root();
        sched.enqueue(WorkerToken::INITIAL, Arc::clone(&root)).unwrap();

        let got = sched.dequeue(WorkerToken::INITIAL).unwrap().unwrap();
        assert_eq!(got.depth(), -1);

        sched.halt();
        assert!(sched.dequeue(WorkerToken::INITIAL).unwrap().is_none());
    }

    #[test]
    fn pq_is_depth_first() {
        let sched: PriorityQueueScheduler<u32, NoopGraph, ()> = PriorityQueueScheduler::new();
        let root = Node::root();
        let nodes = chain(&root, &[0, 5, 2]);
        for n in &nodes {
            sched.enqueue(WorkerToken::INITIAL, Arc::clone(n)).unwrap();
        }
        let mut depths = Vec::new();
        for _ in 0..nodes.len() {
            depths.push(sched.dequeue(WorkerToken::INITIAL).unwrap().unwrap().depth());
        }
        let mut expected: Vec<i64> = nodes.iter().map(|n| n.depth()).collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(depths, expected);
    }

    #[test]
    fn pq_halted_empty_dequeue_does_not_block() {
        let sched: PriorityQueueScheduler<u32, NoopGraph, ()> = PriorityQueueScheduler::new();
        sched.halt();
        assert!(sched.dequeue(WorkerToken::INITIAL).unwrap().is_none());
    }

    #[test]
    fn ws_steal_from_empty_victim_is_a_noop() {
        let mut thief: DepthBuckets<u32, NoopGraph, ()> = BTreeMap::new();
        let mut victim: DepthBuckets<u32, NoopGraph, ()> = BTreeMap::new();
        assert!(!steal(&mut thief, &mut victim));
        assert!(thief.is_empty());
    }

    #[test]
    fn ws_two_workers_second_steals_from_first() {
        let sched: Arc<WorkStealingScheduler<u32, NoopGraph, ()>> = Arc::new(WorkStealingScheduler::new(2));
        let t0 = sched.register_thread();
        let t1 = sched.register_thread();
        assert_eq!(t0.0, 0);
        assert_eq!(t1.0, 1);

        let root = Node::root();
        for _ in 0..10 {
            let node = Node::new_child(&Node::new_child(&Node::new_child(&root)));
            sched.enqueue(t0, node).unwrap();
        }
        assert_eq!(sched.queues[0].lock().get(&2).map(VecDeque::len), Some(10));

        let got = sched.dequeue(t1).unwrap();
        assert!(got.is_some());
        assert_eq!(sched.queues[0].lock().get(&2).map_or(0, VecDeque::len), 5);
    }

    #[test]
    fn ws_dequeue_halted_empty_does_not_block() {
        let sched: WorkStealingScheduler<u32, NoopGraph, ()> = WorkStealingScheduler::new(2);
        let t0 = sched.register_thread();
        sched.halt();
        assert!(sched.dequeue(t0).unwrap().is_none());
    }

    #[test]
    fn pq_enqueue_after_halt_is_an_error() {
        let sched: PriorityQueueScheduler<u32, NoopGraph, ()> = PriorityQueueScheduler::new();
        sched.halt();
        assert!(matches!(
            sched.enqueue(WorkerToken::INITIAL, Node::root()),
            Err(SchedulerError::AlreadyHalted)
        ));
    }

    #[test]
    fn ws_enqueue_after_halt_is_an_error() {
        let sched: WorkStealingScheduler<u32, NoopGraph, ()> = WorkStealingScheduler::new(1);
        let t0 = sched.register_thread();
        sched.halt();
        assert!(matches!(sched.enqueue(t0, Node::root()), Err(SchedulerError::AlreadyHalted)));
    }

    #[test]
    fn ws_invalid_token_is_an_error() {
        let sched: WorkStealingScheduler<u32, NoopGraph, ()> = WorkStealingScheduler::new(1);
        let bogus = WorkerToken(7);
        assert!(matches!(
            sched.enqueue(bogus, Node::root()),
            Err(SchedulerError::InvalidWorkerToken(7))
        ));
    }
}
