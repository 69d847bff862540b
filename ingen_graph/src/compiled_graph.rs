//! CompiledGraph, spec.md §4.4 "Compilation algorithm" / §4.9 "CompiledGraph
//! swap" / §5 "Parallel execution".
//!
//! The serial Kahn sort is grounded on the ordering problem knaster solves
//! with its `node_task_order`/`TaskData` (see `knaster_graph::task`), but
//! knaster never implements the parallel worker-slave scheduler spec.md §5
//! describes (`N worker slaves pull from a shared work queue ... each slave
//! acquires a block's process-lock (trylock) ... wait_for_input(n_providers)
//! blocks on a per-block semaphore`); that part is hand-rolled directly from
//! the spec text using `std::sync` primitives, not `rayon` (rayon's
//! work-stealing pool allocates and isn't realtime-safe).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::block::BlockKey;
use crate::edge::Edge;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScheduleMode {
    Serial,
    /// Parallel execution assisted by `worker_count` additional threads.
    Parallel { worker_count: usize },
}

/// One compiled block: its key plus the bookkeeping needed to run it in
/// topological order, in either schedule mode.
#[derive(Clone)]
struct CompiledBlock {
    key: BlockKey,
    /// Indegree at compile time (spec.md: "n-providers").
    n_providers: usize,
    /// Outgoing intra-graph edges to other compiled blocks.
    dependants: Vec<usize>,
}

/// A cross-graph edge terminating on one of the graph's own pass-through
/// ports rather than another child block; excluded from intra-graph
/// dependency accounting (spec.md §4.4: "Cross-graph edges ... do not add
/// intra-graph dependencies").
fn is_intra_graph(edge: &Edge, keys: &[BlockKey]) -> bool {
    keys.contains(&edge.tail) && keys.contains(&edge.head)
}

/// Per-cycle synchronization state for the parallel scheduler: one
/// countdown semaphore-like counter per compiled block, released by each
/// provider as it finishes.
struct Gate {
    remaining: AtomicUsize,
    cond: Condvar,
    mutex: Mutex<bool>,
}
impl Gate {
    fn new(n_providers: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(n_providers),
            cond: Condvar::new(),
            mutex: Mutex::new(n_providers == 0),
        }
    }
    fn signal(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut ready = self.mutex.lock().unwrap();
            *ready = true;
            self.cond.notify_all();
        }
    }
    fn wait(&self) {
        let mut ready = self.mutex.lock().unwrap();
        while !*ready {
            ready = self.cond.wait(ready).unwrap();
        }
    }
}

/// An immutable, topologically ordered execution plan for one graph's
/// children (spec.md §4.4 "CompiledGraph (C6)").
///
/// Installed atomically on the owning [`crate::graph::GraphBody`]
/// (spec.md §4.9): the audio thread reads the current pointer once per
/// cycle and runs exactly that plan, never a half-installed one.
pub struct CompiledGraph {
    blocks: Vec<CompiledBlock>,
    mode: ScheduleMode,
}

impl CompiledGraph {
    /// Kahn topological sort over the block-level DAG, ties broken by
    /// `keys`' insertion order (spec.md §4.4).
    pub fn compile(keys: &[BlockKey], edges: &[Edge], mode: ScheduleMode) -> Result<Self, CycleError> {
        let index_of = |k: BlockKey| keys.iter().position(|x| *x == k);
        let mut indegree = vec![0usize; keys.len()];
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); keys.len()];
        for e in edges.iter().filter(|e| is_intra_graph(e, keys)) {
            let (Some(t), Some(h)) = (index_of(e.tail), index_of(e.head)) else {
                continue;
            };
            indegree[h] += 1;
            adjacency[t].push(h);
        }

        let mut queue: std::collections::VecDeque<usize> = (0..keys.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(keys.len());
        let mut remaining_indegree = indegree.clone();
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &dep in &adjacency[i] {
                remaining_indegree[dep] -= 1;
                if remaining_indegree[dep] == 0 {
                    queue.push_back(dep);
                }
            }
        }
        if order.len() != keys.len() {
            return Err(CycleError);
        }

        let blocks = order
            .iter()
            .map(|&i| CompiledBlock {
                key: keys[i],
                n_providers: indegree[i],
                dependants: adjacency[i].clone(),
            })
            .collect();
        Ok(CompiledGraph { blocks, mode })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
    /// The compiled order, for callers that just need to drive `process` in
    /// sequence (serial mode, or tests).
    pub fn order(&self) -> impl Iterator<Item = BlockKey> + '_ {
        self.blocks.iter().map(|b| b.key)
    }
    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Runs every compiled block once, dispatching `process_block` in
    /// topological order (serial) or fanned out across `worker_count`
    /// threads plus the calling thread (parallel), per spec.md §4.4.
    ///
    /// `process_block` must be safe to call concurrently for distinct
    /// blocks; the scheduler guarantees a block's providers have all
    /// completed before it is dispatched.
    pub fn run(&self, process_block: impl Fn(BlockKey) + Sync) {
        match self.mode {
            ScheduleMode::Serial => {
                for b in &self.blocks {
                    process_block(b.key);
                }
            }
            ScheduleMode::Parallel { worker_count } => self.run_parallel(worker_count, process_block),
        }
    }

    fn run_parallel(&self, worker_count: usize, process_block: impl Fn(BlockKey) + Sync) {
        let gates: Vec<Arc<Gate>> = self.blocks.iter().map(|b| Arc::new(Gate::new(b.n_providers))).collect();
        let locks: Vec<Mutex<()>> = self.blocks.iter().map(|_| Mutex::new(())).collect();
        // Claimed exactly once per block: the trylock above only keeps two
        // workers from entering the same iteration concurrently, it says
        // nothing about a worker re-trylocking the same already-finished
        // block on a later outer-loop pass, once `gates[i].remaining` has
        // settled at zero for good. Without this, a second dispatch would
        // re-run `process_block` and signal `i`'s dependants a second time,
        // underflowing their `Gate::remaining` countdown.
        let claimed: Vec<std::sync::atomic::AtomicBool> = self.blocks.iter().map(|_| std::sync::atomic::AtomicBool::new(false)).collect();
        let finished = AtomicUsize::new(0);
        let total = self.blocks.len();

        let work = |worker_id: usize| {
            let _ = worker_id;
            loop {
                let mut progressed = false;
                for (i, block) in self.blocks.iter().enumerate() {
                    let Ok(_guard) = locks[i].try_lock() else {
                        continue;
                    };
                    if gates[i].remaining.load(Ordering::Acquire) != 0 {
                        continue;
                    }
                    if claimed[i].compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
                        continue;
                    }
                    gates[i].wait();
                    process_block(block.key);
                    for &dep in &block.dependants {
                        gates[dep].signal();
                    }
                    finished.fetch_add(1, Ordering::AcqRel);
                    progressed = true;
                }
                if finished.load(Ordering::Acquire) >= total {
                    return;
                }
                if !progressed {
                    std::thread::yield_now();
                }
            }
        };

        std::thread::scope(|scope| {
            for w in 0..worker_count {
                scope.spawn(move || work(w + 1));
            }
            work(0);
        });
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("connection would create a cycle")]
pub struct CycleError;


#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn serial_compile_orders_a_chain() {
        let mut keys: SlotMap<BlockKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        let order_keys = [a, b, c];
        let edges = vec![Edge::new(a, 0, b, 0), Edge::new(b, 0, c, 0)];
        let compiled = CompiledGraph::compile(&order_keys, &edges, ScheduleMode::Serial).unwrap();
        let order: Vec<_> = compiled.order().collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn compile_rejects_a_cycle() {
        let mut keys: SlotMap<BlockKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let order_keys = [a, b];
        let edges = vec![Edge::new(a, 0, b, 0), Edge::new(b, 0, a, 0)];
        assert!(CompiledGraph::compile(&order_keys, &edges, ScheduleMode::Serial).is_err());
    }

    #[test]
    fn parallel_run_visits_every_block_exactly_once() {
        let mut keys: SlotMap<BlockKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        let order_keys = [a, b, c];
        let edges = vec![Edge::new(a, 0, b, 0), Edge::new(a, 0, c, 0)];
        let compiled = CompiledGraph::compile(&order_keys, &edges, ScheduleMode::Parallel { worker_count: 2 }).unwrap();
        let seen = Mutex::new(Vec::new());
        compiled.run(|k| seen.lock().unwrap().push(k));
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        let mut deduped = seen.clone();
        deduped.sort_by_key(|k| format!("{k:?}"));
        deduped.dedup();
        assert_eq!(deduped.len(), 3, "every block must be dispatched exactly once, got {seen:?}");
        assert_eq!(seen[0], a);
    }

    /// A wider, deeper DAG with several independent chains feeding a shared
    /// join, run with more workers than there are blocks at any one level,
    /// so that genuine contention for a single block's trylock (rather than
    /// one thread simply winning a race every time) is likely to occur.
    #[test]
    fn parallel_run_over_a_deep_dag_dispatches_each_block_once() {
        let mut keys: SlotMap<BlockKey, ()> = SlotMap::with_key();
        let roots: Vec<BlockKey> = (0..4).map(|_| keys.insert(())).collect();
        let mids: Vec<BlockKey> = (0..4).map(|_| keys.insert(())).collect();
        let join = keys.insert(());
        let tail = keys.insert(());

        let mut order_keys: Vec<BlockKey> = Vec::new();
        order_keys.extend(&roots);
        order_keys.extend(&mids);
        order_keys.push(join);
        order_keys.push(tail);

        let mut edges = Vec::new();
        for (r, m) in roots.iter().zip(mids.iter()) {
            edges.push(Edge::new(*r, 0, *m, 0));
        }
        for m in &mids {
            edges.push(Edge::new(*m, 0, join, 0));
        }
        edges.push(Edge::new(join, 0, tail, 0));

        let compiled = CompiledGraph::compile(&order_keys, &edges, ScheduleMode::Parallel { worker_count: 8 }).unwrap();
        let seen = Mutex::new(Vec::new());
        compiled.run(|k| seen.lock().unwrap().push(k));
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), order_keys.len());
        let mut deduped = seen.clone();
        deduped.sort_by_key(|k| format!("{k:?}"));
        deduped.dedup();
        assert_eq!(deduped.len(), order_keys.len(), "every block must be dispatched exactly once, got {seen:?}");
        assert_eq!(*seen.last().unwrap(), tail, "the join's single dependant must run last");
    }

    /// Generates a random acyclic edge set (every edge points from a lower
    /// to a higher index, so it can never cycle) and checks the parallel
    /// scheduler's two invariants hold regardless of shape: every block
    /// dispatched exactly once, and no block dispatched before a provider.
    #[test]
    fn parallel_run_holds_its_invariants_over_random_dags() {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let n = rng.gen_range(2..16);
            let mut keys: SlotMap<BlockKey, ()> = SlotMap::with_key();
            let order_keys: Vec<BlockKey> = (0..n).map(|_| keys.insert(())).collect();

            let mut edges = Vec::new();
            for tail in 0..n {
                for head in (tail + 1)..n {
                    if rng.gen_bool(0.3) {
                        edges.push(Edge::new(order_keys[tail], 0, order_keys[head], 0));
                    }
                }
            }

            let worker_count = rng.gen_range(1..5);
            let compiled = CompiledGraph::compile(&order_keys, &edges, ScheduleMode::Parallel { worker_count }).unwrap();
            let seen: Mutex<Vec<BlockKey>> = Mutex::new(Vec::new());
            compiled.run(|k| seen.lock().unwrap().push(k));
            let seen = seen.into_inner().unwrap();

            assert_eq!(seen.len(), order_keys.len());
            let mut deduped = seen.clone();
            deduped.sort_by_key(|k| format!("{k:?}"));
            deduped.dedup();
            assert_eq!(deduped.len(), order_keys.len(), "every block must be dispatched exactly once over {seen:?}");

            let position = |k: BlockKey| seen.iter().position(|s| *s == k).unwrap();
            for edge in &edges {
                assert!(position(edge.tail) < position(edge.head), "a block ran before one of its providers");
            }
        }
    }
}
