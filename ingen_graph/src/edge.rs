//! Edges, spec.md §4.4 "Edge (C3)": a connection from one block's output
//! port to another's input port within the same parent graph.
//!
//! Grounded on `knaster_graph::edge::Edge`'s shape (source node key plus
//! what it feeds), adapted from knaster's node-to-node channel piping to
//! ingen's port-to-port connection, since ports (not raw channel indices)
//! are the addressable unit here (spec.md §3 "Port").

use crate::block::BlockKey;

/// A connection from `tail`'s output port `tail_port` to `head`'s input
/// port `head_port`. Both ends live in the same parent graph (spec.md §4.4
/// invariant: "tail and head share an enclosing graph").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub tail: BlockKey,
    pub tail_port: u32,
    pub head: BlockKey,
    pub head_port: u32,
}
impl Edge {
    pub fn new(tail: BlockKey, tail_port: u32, head: BlockKey, head_port: u32) -> Self {
        Self {
            tail,
            tail_port,
            head,
            head_port,
        }
    }
    /// Two edges are the same connection if they share every endpoint
    /// (spec.md §4.4 invariant: "no duplicate tail/head/port tuples").
    pub fn same_connection(&self, other: &Edge) -> bool {
        self.tail == other.tail
            && self.tail_port == other.tail_port
            && self.head == other.head
            && self.head_port == other.head_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn same_connection_requires_every_endpoint_to_match() {
        let mut keys: SlotMap<BlockKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let e1 = Edge::new(a, 0, b, 0);
        let e2 = Edge::new(a, 0, b, 0);
        let e3 = Edge::new(a, 0, b, 1);
        assert!(e1.same_connection(&e2));
        assert!(!e1.same_connection(&e3));
    }
}
