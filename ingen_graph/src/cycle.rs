//! Per-cycle graph execution, spec.md §4.4 "Graph ... process(ctx) walks
//! its CompiledGraph" and §4.3 "polyphonic fan-in".
//!
//! Grounded on `knaster_graph::node::Node::process`'s per-node dispatch,
//! generalized from one monomorphic `Gen` call per node to: mix each
//! input port's fan-in per spec.md §4.3's mono/broadcast/sum rules, clear
//! output ports, then dispatch the block (`run` for a plugin, recurse for
//! a nested graph), walking the compiled topological order.
//!
//! Unlike [`crate::compiled_graph::CompiledGraph::run`]'s worker-pool
//! dispatch (spec.md §5), this driver always walks the order serially:
//! mixing a port's fan-in needs read access to sibling blocks' output
//! buffers immediately before a mutable borrow of the block being run,
//! which safe Rust only gives one block at a time without per-block
//! disjoint mutable indexing into the children arena. Parallelizing this
//! safely is left as a known simplification; see `DESIGN.md`.
//!
//! A disabled block (spec.md §11/§12) is skipped outright: its inputs
//! aren't mixed, its outputs aren't cleared, and it's neither run nor
//! recursed into, so its buffers simply hold whatever they last did. A
//! plugin that panics mid-`run` is caught (spec.md §7 "per-block fault
//! isolation") and deactivates itself the same way, reporting the fault to
//! every registered client instead of unwinding across the rest of the
//! cycle.

use crate::block::{Block, BlockKey};
use crate::broadcaster::{Broadcaster, BroadcastMessage};
use crate::buffer::Buffer;
use crate::context::ProcessContext;
use crate::port::PortDirection;

/// Runs one cycle for a graph block: mixes every child's input ports from
/// its incoming edges, clears its output ports, then dispatches `run`
/// (plugin) or recurses (nested graph), in compiled topological order.
/// A no-op if `block` isn't a graph.
pub fn run_graph_cycle(block: &mut Block, ctx: ProcessContext, broadcaster: &Broadcaster) {
    let Some(body) = block.graph_body_mut() else { return };
    let order: Vec<BlockKey> = body.current_compiled().order().collect();
    let edges = body.edges.clone();

    for key in order {
        if !body.children[key].enabled {
            continue;
        }

        mix_input_ports(body, &edges, key);

        for port in body.children[key].ports.iter_mut() {
            if port.direction == PortDirection::Output {
                port.clear_output();
            }
        }

        if body.children[key].is_graph() {
            run_graph_cycle(&mut body.children[key], ctx, broadcaster);
        } else if body.children[key].run_plugin(ctx.nframes()).is_err() {
            let path = body.children[key].path.clone();
            body.children[key].enabled = false;
            broadcaster.broadcast(BroadcastMessage::Faulted { path });
        }
    }
}

fn mix_input_ports(body: &mut crate::graph::GraphBody, edges: &[crate::edge::Edge], key: BlockKey) {
    let head_poly = body.children[key].poly;
    let num_ports = body.children[key].ports.len();
    for port_idx in 0..num_ports {
        if body.children[key].ports[port_idx].direction != PortDirection::Input {
            continue;
        }
        for voice_idx in 0..head_poly.max(1) {
            let sources = fan_in_sources(body, edges, key, port_idx as u32, head_poly, voice_idx);
            if sources.is_empty() {
                continue;
            }
            let refs: Vec<&Buffer> = sources.iter().collect();
            body.children[key].ports[port_idx].mix_inputs(voice_idx, &refs);
        }
    }
}

/// Resolves one input port's sources for one voice, per spec.md §4.3's
/// polyphony fan-in rules: mono (equal poly, voice-i reads voice-i),
/// broadcast (tail poly 1, every head voice reads it), sum (head poly 1,
/// every tail voice feeds the one head voice).
fn fan_in_sources(body: &crate::graph::GraphBody, edges: &[crate::edge::Edge], head: BlockKey, head_port: u32, head_poly: usize, voice_idx: usize) -> Vec<Buffer> {
    let mut sources = Vec::new();
    for edge in edges.iter().filter(|e| e.head == head && e.head_port == head_port) {
        let tail_port = &body.children[edge.tail].ports[edge.tail_port as usize];
        let tail_poly = tail_port.poly();
        if head_poly <= 1 {
            for v in 0..tail_poly {
                sources.push(tail_port.voice(v).clone());
            }
        } else if tail_poly == 1 {
            sources.push(tail_port.voice(0).clone());
        } else {
            sources.push(tail_port.voice(voice_idx.min(tail_poly - 1)).clone());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::broadcaster::Broadcaster;
    use crate::buffer::BufferFactory;
    use crate::compiled_graph::ScheduleMode;
    use crate::edge::Edge;
    use crate::event::{self, Event};
    use crate::graph::GraphBody;
    use crate::reclaim;
    use ingen_core::internal_plugins::InternalPluginHost;
    use ingen_primitives::{Cycle, Path, Symbol, Uri};

    fn root_block() -> Block {
        Block::new_graph(Path::root(), Symbol::new("root").unwrap(), GraphBody::new(1, ScheduleMode::Serial), Vec::new(), 1)
    }

    #[test]
    fn running_a_chain_delays_the_trigger_output_by_one_cycle() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage = reclaim::new_channel(8).0;

        for (path, uri) in [
            ("/a", "http://drobilla.net/ns/ingen-internals#Trigger"),
            ("/b", "http://drobilla.net/ns/ingen-internals#BlockDelay"),
        ] {
            let create = Event::CreateBlock {
                path: Path::parse(path).unwrap(),
                plugin_uri: Uri::new(uri),
                poly: 1,
            };
            let r = event::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &create);
            assert_eq!(r.status, ingen_core::Status::Success);
        }
        let connect = Event::Connect {
            tail: Path::parse("/a").unwrap(),
            tail_port: Symbol::new("out").unwrap(),
            head: Path::parse("/b").unwrap(),
            head_port: Symbol::new("in").unwrap(),
        };
        let r = event::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &connect);
        assert_eq!(r.status, ingen_core::Status::Success);

        let ctx = ProcessContext::new(Cycle::new(0, 4), 48_000.0);
        let broadcaster = Broadcaster::new();
        // Two cycles run without panicking; wiring (connect_port, edge
        // mixing) is exercised even though the internal plugins used here
        // don't themselves produce interesting output without host input.
        run_graph_cycle(&mut root, ctx, &broadcaster);
        run_graph_cycle(&mut root, ctx, &broadcaster);
    }

    #[test]
    fn disabled_block_is_skipped_entirely() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage = reclaim::new_channel(8).0;

        let create = Event::CreateBlock {
            path: Path::parse("/a").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#Trigger"),
            poly: 1,
        };
        event::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &create);

        let body = root.graph_body_mut().unwrap();
        let key = body.find_child_by_symbol(&Symbol::new("a").unwrap()).unwrap();
        body.children[key].enabled = false;
        let out_index = body.children[key].port_index_by_symbol(&Symbol::new("out").unwrap()).unwrap();
        body.children[key].ports[out_index as usize].voice_mut(0).set_block(42.0, 0, 4);

        let ctx = ProcessContext::new(Cycle::new(0, 4), 48_000.0);
        let broadcaster = Broadcaster::new();
        run_graph_cycle(&mut root, ctx, &broadcaster);

        let body = root.graph_body().unwrap();
        // clear_output never ran against a disabled block: its buffer still
        // holds the sentinel value set above.
        assert_eq!(body.children[key].ports[out_index as usize].voice(0).audio_samples()[0], 42.0);
    }

    #[test]
    fn broadcast_fan_in_feeds_every_polyphonic_voice() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage = reclaim::new_channel(8).0;

        let create_src = Event::CreateBlock {
            path: Path::parse("/src").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#Trigger"),
            poly: 1,
        };
        event::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &create_src);
        let create_dst = Event::CreateBlock {
            path: Path::parse("/dst").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#BlockDelay"),
            poly: 4,
        };
        event::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &create_dst);

        let body = root.graph_body().unwrap();
        let src_key = body.find_child_by_symbol(&Symbol::new("src").unwrap()).unwrap();
        let dst_key = body.find_child_by_symbol(&Symbol::new("dst").unwrap()).unwrap();
        let src_out = body.children[src_key].port_index_by_symbol(&Symbol::new("out").unwrap()).unwrap();
        let dst_in = body.children[dst_key].port_index_by_symbol(&Symbol::new("in").unwrap()).unwrap();

        let body = root.graph_body_mut().unwrap();
        body.edges.push(Edge::new(src_key, src_out, dst_key, dst_in));
        let old = body.recompile().unwrap();
        garbage.push(reclaim::Garbage::CompiledGraph(old));

        let ctx = ProcessContext::new(Cycle::new(0, 4), 48_000.0);
        let broadcaster = Broadcaster::new();
        run_graph_cycle(&mut root, ctx, &broadcaster);
        let body = root.graph_body().unwrap();
        assert_eq!(body.children[dst_key].ports[dst_in as usize].poly(), 4);
    }
}
