//! ProcessContext / RunContext, spec.md §4.4/§4.12 (C12): the per-cycle time
//! window every `Block::process`/`Port::pre_process`/`post_process` call
//! runs against, plus the pool of worker slaves assisting a parallel
//! schedule (spec.md §5).
//!
//! Built directly on [`ingen_primitives::Cycle`], which already carries the
//! `[start, start+nframes)` sample window; this just attaches the
//! engine-wide constants (sample rate) and the slave pool handle a
//! `CompiledGraph::run` needs.

use ingen_primitives::Cycle;

/// The frame-accurate window and engine constants for one audio callback.
#[derive(Copy, Clone, Debug)]
pub struct ProcessContext {
    pub cycle: Cycle,
    pub sample_rate: f64,
}
impl ProcessContext {
    pub fn new(cycle: Cycle, sample_rate: f64) -> Self {
        Self { cycle, sample_rate }
    }
    pub fn start(&self) -> u64 {
        self.cycle.start
    }
    pub fn nframes(&self) -> u32 {
        self.cycle.nframes
    }
    /// Whether frame-accurate timestamp `at` falls within this cycle
    /// (spec.md §4.6 execute: "start <= _time <= start + nframes").
    pub fn contains(&self, at: u64) -> bool {
        self.cycle.contains(at)
    }
}

/// The same window, handed to pre_process/post_process which run off the
/// audio thread and so don't need the realtime constraints `ProcessContext`
/// implies, but do need to know which cycle an event's effects target.
pub type RunContext = ProcessContext;
