//! Blocks, spec.md §4.4 "Block and Graph" / §9 "Class hierarchies → tagged
//! variants".
//!
//! `GraphObject -> {Block, Port, Graph}` inheritance in the original becomes
//! one sum type here: a common header (`path`, `symbol`, `parent`,
//! `properties`) plus a `BlockKind` payload, dispatching explicitly where
//! behavior diverges (only `process` does, today). Grounded on
//! `knaster_graph::node::Node`'s header-plus-payload shape, generalized
//! from "always a UGen" to "a plugin instance or a nested graph".

use std::collections::BTreeMap;

use ingen_core::BlockImpl;
use ingen_primitives::{Atom, AtomScope, Path, Symbol, Uri};
use slotmap::new_key_type;

use crate::graph::GraphBody;
use crate::port::Port;

new_key_type! {
    /// Keys are only valid within the `SlotMap` of the [`GraphBody`] that
    /// minted them (spec.md §9: "parent references are weak, looked up
    /// through the owning Graph's children array").
    pub struct BlockKey;
}

/// What a block actually does when `process` is called.
pub enum BlockKind {
    /// A plugin instance driven through [`ingen_core::BlockImpl`].
    Plugin {
        plugin_uri: Uri,
        impl_: Box<dyn BlockImpl>,
    },
    /// A nested graph; recurses into its own compiled schedule.
    Graph(Box<GraphBody>),
}

/// Common fields every graph object carries (spec.md §9).
pub struct Block {
    pub path: Path,
    pub symbol: Symbol,
    pub parent: Option<BlockKey>,
    pub properties: BTreeMap<Uri, (AtomScope, Atom)>,
    pub ports: Vec<Port>,
    pub poly: usize,
    /// Whether a cycle actually runs this block (spec.md §11/§12's
    /// enable/disable toggle, grounded on `original_source`'s
    /// `DisableEvent.cpp`/`EnableEvent.cpp`). A disabled block is skipped
    /// entirely by [`crate::cycle::run_graph_cycle`]: not mixed into, not
    /// run, not recursed into.
    pub enabled: bool,
    pub kind: BlockKind,
}

impl Block {
    pub fn new_plugin(path: Path, symbol: Symbol, plugin_uri: Uri, impl_: Box<dyn BlockImpl>, ports: Vec<Port>, poly: usize) -> Self {
        Self {
            path,
            symbol,
            parent: None,
            properties: BTreeMap::new(),
            ports,
            poly,
            enabled: true,
            kind: BlockKind::Plugin { plugin_uri, impl_ },
        }
    }
    pub fn new_graph(path: Path, symbol: Symbol, body: GraphBody, ports: Vec<Port>, poly: usize) -> Self {
        Self {
            path,
            symbol,
            parent: None,
            properties: BTreeMap::new(),
            ports,
            poly,
            enabled: true,
            kind: BlockKind::Graph(Box::new(body)),
        }
    }

    pub fn is_graph(&self) -> bool {
        matches!(self.kind, BlockKind::Graph(_))
    }
    pub fn graph_body(&self) -> Option<&GraphBody> {
        match &self.kind {
            BlockKind::Graph(g) => Some(g),
            _ => None,
        }
    }
    pub fn graph_body_mut(&mut self) -> Option<&mut GraphBody> {
        match &mut self.kind {
            BlockKind::Graph(g) => Some(g),
            _ => None,
        }
    }

    pub fn port(&self, index: u32) -> Option<&Port> {
        self.ports.get(index as usize)
    }
    pub fn port_mut(&mut self, index: u32) -> Option<&mut Port> {
        self.ports.get_mut(index as usize)
    }
    /// Resolves a port's own symbol to its index, for paths of the form
    /// `/g/a/out` (block path `/g/a`, port symbol `out`).
    pub fn port_index_by_symbol(&self, symbol: &Symbol) -> Option<u32> {
        self.ports.iter().find(|p| &p.symbol == symbol).map(|p| p.index)
    }

    /// Runs one cycle for `[start, start+nframes)` on a plugin block.
    /// Graph blocks are instead driven by
    /// [`crate::compiled_graph::CompiledGraph::run`] from the caller, since
    /// that needs access to sibling blocks this block can't see.
    ///
    /// A panicking plugin is caught rather than allowed to unwind across
    /// the whole audio cycle (spec.md §7 per-block fault isolation); `Ok`
    /// means the plugin ran normally, `Err` means it panicked and the
    /// caller should deactivate this block.
    pub fn run_plugin(&mut self, nframes: u32) -> Result<(), ()> {
        if let BlockKind::Plugin { impl_, .. } = &mut self.kind {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| impl_.run(nframes))).map_err(|_| ())
        } else {
            Ok(())
        }
    }
}

/// A validated polyphony request (spec.md §9 open question: polyphony on a
/// graph sets internal-poly; on a block it's a rebuild request — the two
/// are never resolved in the same `Delta`, see [`crate::event`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Poly(pub usize);
impl Poly {
    /// spec.md §3: polyphony is valid over the open-ended range `(1..128)`.
    pub const MAX: usize = 128;
    pub fn new(n: usize) -> Option<Self> {
        if n >= 1 && n <= Self::MAX { Some(Poly(n)) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly_rejects_zero_and_oversized() {
        assert!(Poly::new(0).is_none());
        assert!(Poly::new(1).is_some());
        assert!(Poly::new(Poly::MAX).is_some());
        assert!(Poly::new(Poly::MAX + 1).is_none());
    }

    #[test]
    fn poly_bound_matches_the_spec_literal_128() {
        assert!(Poly::new(128).is_some());
        assert!(Poly::new(129).is_none());
    }

    /// Randomized sweep over the valid/invalid boundary, using `rand` as
    /// SPEC_FULL.md §10.4 promises for this crate's property-style tests.
    #[test]
    fn poly_accepts_exactly_the_closed_range_one_to_max() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n: usize = rng.gen_range(0..=300);
            let accepted = Poly::new(n).is_some();
            assert_eq!(accepted, n >= 1 && n <= Poly::MAX, "n={n}");
        }
    }
}
