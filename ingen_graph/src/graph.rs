//! Graph bodies, spec.md §4.4 "Block and Graph": "Graph's process(ctx) walks
//! its CompiledGraph" plus "Pass-through ports".
//!
//! A `Graph` is itself a [`crate::block::Block`] (`BlockKind::Graph`); this
//! module holds the payload that makes it one: its children arena, its
//! edges, and the atomically swapped [`CompiledGraph`] the audio thread
//! reads once per cycle (spec.md §4.9). The atomic-pointer swap is named
//! explicitly in the spec; `knaster_graph` instead hands a boxed `TaskData`
//! across an `rtrb` ring (`knaster_graph::task::TaskData`), which is the
//! same "audio thread reads a stable snapshot once per cycle" guarantee via
//! a different channel. Spec.md's wording is followed literally here.

use std::sync::atomic::{AtomicPtr, Ordering};

use slotmap::SlotMap;

use crate::block::{Block, BlockKey};
use crate::compiled_graph::{CompiledGraph, CycleError, ScheduleMode};
use crate::edge::Edge;
use crate::port::{Port, PortDirection};

pub use crate::block::BlockKey as GraphKey;

/// The payload of a `BlockKind::Graph` (spec.md §4.4 "Graph (C5)").
pub struct GraphBody {
    pub children: SlotMap<BlockKey, Block>,
    pub edges: Vec<Edge>,
    /// Polyphony requested for children created without an explicit
    /// override (spec.md §9: "polyphony on a graph sets internal-poly").
    pub internal_poly: usize,
    pub schedule_mode: ScheduleMode,
    compiled: AtomicPtr<CompiledGraph>,
}

impl GraphBody {
    pub fn new(internal_poly: usize, schedule_mode: ScheduleMode) -> Self {
        let empty = Box::new(CompiledGraph::compile(&[], &[], schedule_mode).expect("an empty graph never cycles"));
        Self {
            children: SlotMap::with_key(),
            edges: Vec::new(),
            internal_poly,
            schedule_mode,
            compiled: AtomicPtr::new(Box::into_raw(empty)),
        }
    }

    /// Recompiles the schedule from the current children/edges and
    /// atomically installs it, returning the displaced pointer for the
    /// reclaimer (spec.md §4.9: "the old pointer is pushed to the
    /// reclaimer").
    ///
    /// # Safety
    /// The caller (always the preprocessor, during `pre_process`, or the
    /// execute phase installing a plan built by it) must push the returned
    /// pointer to [`crate::reclaim::Reclaimer`] rather than dropping it
    /// directly, since the audio thread may be mid-cycle against it.
    #[must_use]
    pub fn recompile(&self) -> Result<*mut CompiledGraph, CycleError> {
        let keys: Vec<BlockKey> = self.children.keys().collect();
        let compiled = Box::new(CompiledGraph::compile(&keys, &self.edges, self.schedule_mode)?);
        let new_ptr = Box::into_raw(compiled);
        Ok(self.swap_compiled(new_ptr))
    }

    /// Installs `new_ptr` as current, returning the displaced one. This is
    /// the one call that may run on the audio thread during `execute`
    /// (spec.md §4.9).
    pub fn swap_compiled(&self, new_ptr: *mut CompiledGraph) -> *mut CompiledGraph {
        self.compiled.swap(new_ptr, Ordering::AcqRel)
    }

    /// Reads the pointer once; the caller holds onto the returned reference
    /// for the rest of the cycle, never re-reading the atomic mid-cycle
    /// (spec.md §4.9: "always reads the pointer once at cycle start").
    pub fn current_compiled(&self) -> &CompiledGraph {
        unsafe { &*self.compiled.load(Ordering::Acquire) }
    }

    pub fn find_child_by_symbol(&self, symbol: &ingen_primitives::Symbol) -> Option<BlockKey> {
        self.children.iter().find(|(_, b)| &b.symbol == symbol).map(|(k, _)| k)
    }
}
impl Drop for GraphBody {
    fn drop(&mut self) {
        let ptr = self.compiled.load(Ordering::Acquire);
        if !ptr.is_null() {
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

/// Creates the two default control ports every new graph gets (spec.md
/// §4.7 CreateGraph: "create default control_in/control_out atom-sequence
/// ports (indices 0,1)").
pub fn default_control_ports(factory: &crate::buffer::BufferFactory, poly: usize) -> Vec<Port> {
    vec![
        Port::new(
            crate::port::PortType::Sequence,
            PortDirection::Input,
            0,
            ingen_primitives::Symbol::new("control_in").unwrap(),
            poly,
            factory,
            crate::defaults::SEQUENCE_BUFFER_BYTES,
        ),
        Port::new(
            crate::port::PortType::Sequence,
            PortDirection::Output,
            1,
            ingen_primitives::Symbol::new("control_out").unwrap(),
            poly,
            factory,
            crate::defaults::SEQUENCE_BUFFER_BYTES,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_graph_compiles_to_an_empty_schedule() {
        let body = GraphBody::new(1, ScheduleMode::Serial);
        assert_eq!(body.current_compiled().len(), 0);
    }

    #[test]
    fn recompile_after_adding_children_reflects_new_order() {
        use ingen_core::internal_plugins::Trigger;
        use ingen_primitives::{Path, Symbol, Uri};

        let mut body = GraphBody::new(1, ScheduleMode::Serial);
        let a = body.children.insert(Block::new_plugin(
            Path::parse("/g/a").unwrap(),
            Symbol::new("a").unwrap(),
            Uri::new("internal:Trigger"),
            Box::new(Trigger::default()),
            Vec::new(),
            1,
        ));
        let old = body.recompile().unwrap();
        assert!(!old.is_null());
        unsafe { drop(Box::from_raw(old)) };
        let order: Vec<_> = body.current_compiled().order().collect();
        assert_eq!(order, vec![a]);
    }
}
