//! Engine configuration, spec.md §10.3 "Configuration".
//!
//! Grounded on `knaster_graph::runner::RunnerOptions`: a small `Clone +
//! Debug` struct with a `Default` carrying the same numbers
//! (`block_size: 64`, `sample_rate: 48000`, `ring_buffer_size: 1000`),
//! extended with the handful of capacities/worker counts this workspace's
//! three-thread pipeline and parallel scheduler need that a single flat
//! graph never did.

/// Everything [`crate::Engine::new`] needs to size its buffers, rings, and
/// worker pool up front. Nothing here is adjustable after construction —
/// changing sample rate or block size means building a new `Engine`.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// The block size the root graph processes, in frames.
    pub block_size: u32,
    /// The sample rate the root graph processes at, in Hz.
    pub sample_rate: f64,
    /// Capacity of the preprocessor→audio-thread execution ring and the
    /// audio-thread→postprocessor completion ring (spec.md §5).
    pub ring_buffer_size: usize,
    /// Capacity of the reclaimer's garbage ring (spec.md §4.6).
    pub reclaim_queue_size: usize,
    /// Number of worker slaves assisting a `ScheduleMode::Parallel` graph
    /// compilation (spec.md §4.4). `0` compiles every graph
    /// `ScheduleMode::Serial` instead.
    pub worker_count: usize,
    /// Polyphony the root graph starts at (spec.md §9 "polyphony").
    pub root_poly: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            block_size: 64,
            sample_rate: 48_000.0,
            ring_buffer_size: 1000,
            reclaim_queue_size: 1000,
            worker_count: 0,
            root_poly: 1,
        }
    }
}
