//! Integration tests exercising the event pipeline and per-cycle driver
//! together, end to end, the way a client actually uses this crate: submit
//! events through `pre_process`, then drive `run_graph_cycle` against
//! whatever tree results (spec.md §8's scenario list).

use ingen_core::internal_plugins::InternalPluginHost;
use ingen_core::{PortKind, Status};
use ingen_graph::{reclaim, Block, Broadcaster, BufferFactory, DeltaMode, Event, GraphBody, PortDirection, ProcessContext, ScheduleMode, Store};
use ingen_primitives::{Atom, Cycle, Path, Symbol, Uri};

const TRIGGER: &str = "http://drobilla.net/ns/ingen-internals#Trigger";
const BLOCK_DELAY: &str = "http://drobilla.net/ns/ingen-internals#BlockDelay";
const TIME: &str = "http://drobilla.net/ns/ingen-internals#Time";

fn root_block() -> Block {
    Block::new_graph(Path::root(), Symbol::new("root").unwrap(), GraphBody::new(1, ScheduleMode::Serial), Vec::new(), 1)
}

fn create_block(root: &mut Block, path: &str, plugin_uri: &str, poly: usize) {
    let host = InternalPluginHost;
    let factory = BufferFactory::new();
    let mut garbage = reclaim::new_channel(8).0;
    let event = Event::CreateBlock {
        path: Path::parse(path).unwrap(),
        plugin_uri: Uri::new(plugin_uri),
        poly,
    };
    let r = ingen_graph::pre_process(root, &factory, &host, 48_000.0, 64, &mut garbage, &event);
    assert_eq!(r.status, Status::Success, "create_block({path}) failed: {:?}", r.status);
}

fn connect(root: &mut Block, tail: &str, tail_port: &str, head: &str, head_port: &str) -> Status {
    let host = InternalPluginHost;
    let factory = BufferFactory::new();
    let mut garbage = reclaim::new_channel(8).0;
    let event = Event::Connect {
        tail: Path::parse(tail).unwrap(),
        tail_port: Symbol::new(tail_port).unwrap(),
        head: Path::parse(head).unwrap(),
        head_port: Symbol::new(head_port).unwrap(),
    };
    ingen_graph::pre_process(root, &factory, &host, 48_000.0, 64, &mut garbage, &event).status
}

/// A mono Trigger -> BlockDelay chain: connecting two poly-1 blocks needs no
/// fan-in mixing beyond a straight copy, and `BlockDelay` plays its input
/// back exactly one cycle late (spec.md §8 "mono chain").
#[test]
fn mono_chain_delays_the_trigger_pulse_by_one_cycle() {
    let mut root = root_block();
    create_block(&mut root, "/a", TRIGGER, 1);
    create_block(&mut root, "/b", BLOCK_DELAY, 1);
    assert_eq!(connect(&mut root, "/a", "out", "/b", "in"), Status::Success);

    let body = root.graph_body_mut().unwrap();
    let a_key = body.find_child_by_symbol(&Symbol::new("a").unwrap()).unwrap();
    let midi_idx = body.children[a_key].port_index_by_symbol(&Symbol::new("midi_in").unwrap()).unwrap();
    // A Note-On at frame 3 drives a single-sample pulse there (see
    // `ingen_core::internal_plugins::Trigger::run`).
    body.children[a_key].ports[midi_idx as usize].voice_mut(0).append_event(3, 1, &[0x90, 60, 100]);

    let broadcaster = Broadcaster::new();
    let ctx = ProcessContext::new(Cycle::new(0, 4), 48_000.0);
    ingen_graph::run_graph_cycle(&mut root, ctx, &broadcaster);

    let body = root.graph_body().unwrap();
    let b_key = body.find_child_by_symbol(&Symbol::new("b").unwrap()).unwrap();
    let b_out_idx = body.children[b_key].port_index_by_symbol(&Symbol::new("out").unwrap()).unwrap();
    let first_cycle: Vec<f32> = body.children[b_key].ports[b_out_idx as usize].voice(0).audio_samples()[..4].to_vec();
    assert_eq!(first_cycle, vec![0.0; 4]);

    let ctx = ProcessContext::new(Cycle::new(4, 4), 48_000.0);
    ingen_graph::run_graph_cycle(&mut root, ctx, &broadcaster);
    let body = root.graph_body().unwrap();
    let b_out_idx = body.children[b_key].port_index_by_symbol(&Symbol::new("out").unwrap()).unwrap();
    let second_cycle: Vec<f32> = body.children[b_key].ports[b_out_idx as usize].voice(0).audio_samples()[..4].to_vec();
    assert_eq!(second_cycle, vec![0.0, 0.0, 0.0, 1.0], "the pulse at frame 3 should surface one cycle later");
}

/// A third connection closing a loop between two audio blocks must be
/// rejected rather than silently compiled into an unrunnable schedule
/// (spec.md §8 "cycle rejection").
#[test]
fn connecting_a_loop_is_rejected_as_a_cycle() {
    let mut root = root_block();
    create_block(&mut root, "/a", BLOCK_DELAY, 1);
    create_block(&mut root, "/b", BLOCK_DELAY, 1);
    assert_eq!(connect(&mut root, "/a", "out", "/b", "in"), Status::Success);
    assert_eq!(connect(&mut root, "/b", "out", "/a", "in"), Status::Cycle);

    // The rejected edge must not have been left installed: the schedule
    // still has exactly the one edge from the first connect.
    let body = root.graph_body().unwrap();
    assert_eq!(body.edges.len(), 1);
}

/// A poly-4 head fed by a poly-1 tail broadcasts that one source to every
/// voice; the reverse (poly-4 tail into a poly-1 head) sums every voice
/// into the one (spec.md §4.3, §8 "polyphonic fan-in"). `connect` accepts
/// both shapes; the actual mixing arithmetic is exercised directly against
/// `Port::mix_inputs` here since every internal plugin's own `run` only
/// ever drives voice 0 of its ports (poly beyond that is pass-through
/// bookkeeping the plugin itself never touches), which would otherwise
/// clobber a hand-set sentinel on the other voices before a cycle got to
/// mix them.
#[test]
fn sum_fan_in_feeds_a_mono_head_from_every_voice() {
    let mut root = root_block();
    create_block(&mut root, "/src", BLOCK_DELAY, 4);
    create_block(&mut root, "/dst", BLOCK_DELAY, 1);
    assert_eq!(connect(&mut root, "/src", "out", "/dst", "in"), Status::Success);

    let body = root.graph_body_mut().unwrap();
    let src_key = body.find_child_by_symbol(&Symbol::new("src").unwrap()).unwrap();
    let dst_key = body.find_child_by_symbol(&Symbol::new("dst").unwrap()).unwrap();
    let src_out = body.children[src_key].port_index_by_symbol(&Symbol::new("out").unwrap()).unwrap();
    let dst_in = body.children[dst_key].port_index_by_symbol(&Symbol::new("in").unwrap()).unwrap();
    assert_eq!(body.children[dst_key].ports[dst_in as usize].poly(), 1);

    for v in 0..4 {
        body.children[src_key].ports[src_out as usize].voice_mut(v).set_block(1.0, 0, 4);
    }
    let owned: Vec<ingen_graph::Buffer> = (0..4).map(|v| body.children[src_key].ports[src_out as usize].voice(v).clone()).collect();
    let sources: Vec<&ingen_graph::Buffer> = owned.iter().collect();
    body.children[dst_key].ports[dst_in as usize].mix_inputs(0, &sources);

    assert_eq!(body.children[dst_key].ports[dst_in as usize].voice(0).audio_samples()[0], 4.0);
}

/// Disconnecting a port's last incoming edge resets it to its stored
/// constant rather than leaving it holding whatever the last mix produced
/// (spec.md §4.5, §8 "disconnect resets value").
#[test]
fn disconnect_resets_the_port_to_its_stored_value() {
    let mut root = root_block();
    create_block(&mut root, "/a", TIME, 1);
    create_block(&mut root, "/b", TRIGGER, 1);

    let host = InternalPluginHost;
    let factory = BufferFactory::new();
    let mut garbage = reclaim::new_channel(8).0;
    let create_port = Event::CreatePort {
        path: Path::parse("/b").unwrap(),
        port_symbol: Symbol::new("level").unwrap(),
        kind: PortKind::Control,
        direction: PortDirection::Input,
    };
    let r = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &create_port);
    assert_eq!(r.status, Status::Success);

    assert_eq!(connect(&mut root, "/a", "elapsed", "/b", "level"), Status::Success);

    let set_value = Event::SetPortValue {
        port: Path::parse("/b").unwrap(),
        port_symbol: Symbol::new("level").unwrap(),
        value: Atom::Float(0.75),
        time: ingen_primitives::Seconds::ZERO,
    };
    let r = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &set_value);
    assert_eq!(r.status, Status::Success);

    let disconnect = Event::Disconnect {
        tail: Path::parse("/a").unwrap(),
        tail_port: Symbol::new("elapsed").unwrap(),
        head: Path::parse("/b").unwrap(),
        head_port: Symbol::new("level").unwrap(),
    };
    let r = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &disconnect);
    assert_eq!(r.status, Status::Success);

    let body = root.graph_body().unwrap();
    let b_key = body.find_child_by_symbol(&Symbol::new("b").unwrap()).unwrap();
    let level_idx = body.children[b_key].port_index_by_symbol(&Symbol::new("level").unwrap()).unwrap();
    assert_eq!(body.children[b_key].ports[level_idx as usize].voice(0).control_value(), 0.75);
    assert!(body.children[b_key].ports[level_idx as usize].incoming().is_empty());
}

/// Deleting a graph removes every descendant along with it, not just the
/// graph block itself (spec.md §8 "delete cascade").
#[test]
fn deleting_a_graph_cascades_to_its_children() {
    let mut root = root_block();
    let host = InternalPluginHost;
    let factory = BufferFactory::new();
    let mut garbage = reclaim::new_channel(8).0;

    let create_graph = Event::CreateGraph { path: Path::parse("/g").unwrap(), poly: 1 };
    let r = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &create_graph);
    assert_eq!(r.status, Status::Success);

    create_block(&mut root, "/g/a", TRIGGER, 1);
    create_block(&mut root, "/g/b", BLOCK_DELAY, 1);
    assert_eq!(connect(&mut root, "/g/a", "out", "/g/b", "in"), Status::Success);

    assert!(Store::resolve(&root, &Path::parse("/g/a").unwrap()).is_some());

    let delete = Event::Delete { path: Path::parse("/g").unwrap() };
    let r = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &delete);
    assert_eq!(r.status, Status::Success);

    assert!(Store::resolve(&root, &Path::parse("/g").unwrap()).is_none());
    assert!(Store::resolve(&root, &Path::parse("/g/a").unwrap()).is_none());
    assert!(Store::resolve(&root, &Path::parse("/g/b").unwrap()).is_none());
}

/// Adding a block mid-session swaps in a new `CompiledGraph` pointer rather
/// than mutating the one the audio thread might be running against, and a
/// cycle run right after picks up the new block immediately (spec.md §4.9,
/// §8 "hot swap").
#[test]
fn adding_a_block_hot_swaps_the_compiled_schedule() {
    let mut root = root_block();
    create_block(&mut root, "/a", TRIGGER, 1);

    let before_len = root.graph_body().unwrap().current_compiled().len();
    assert_eq!(before_len, 1);

    create_block(&mut root, "/b", BLOCK_DELAY, 1);
    assert_eq!(connect(&mut root, "/a", "out", "/b", "in"), Status::Success);

    let body = root.graph_body().unwrap();
    assert_eq!(body.current_compiled().len(), 2);
    let order: Vec<_> = body.current_compiled().order().collect();
    assert_eq!(order.len(), 2);

    // The newly installed schedule runs cleanly: neither block panics or
    // gets deactivated mid-cycle.
    let broadcaster = Broadcaster::new();
    let ctx = ProcessContext::new(Cycle::new(0, 4), 48_000.0);
    ingen_graph::run_graph_cycle(&mut root, ctx, &broadcaster);
    let body = root.graph_body().unwrap();
    for (_, child) in body.children.iter() {
        assert!(child.enabled);
    }
}

/// `Delta`'s `enabled` toggle is the one the event pipeline itself applies;
/// disabling a block here and then running a cycle exercises the same skip
/// path spec.md §11/§12 describe, through the public event API rather than
/// poking `enabled` directly.
#[test]
fn delta_disable_then_enable_round_trips_through_a_cycle() {
    let mut root = root_block();
    create_block(&mut root, "/a", TRIGGER, 1);

    let host = InternalPluginHost;
    let factory = BufferFactory::new();
    let mut garbage = reclaim::new_channel(8).0;
    let disable = Event::Delta {
        subject: Path::parse("/a").unwrap(),
        add: Vec::new(),
        remove: Vec::new(),
        mode: DeltaMode::Set,
        poly: None,
        enabled: Some(false),
    };
    let r = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &disable);
    assert_eq!(r.status, Status::Success);
    assert!(!Store::resolve(&root, &Path::parse("/a").unwrap()).unwrap().enabled);

    // The undo event, applied, must bring it back.
    let undo = r.undo.expect("Delta toggling `enabled` must produce an undo event");
    let r2 = ingen_graph::pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage, &undo);
    assert_eq!(r2.status, Status::Success);
    assert!(Store::resolve(&root, &Path::parse("/a").unwrap()).unwrap().enabled);
}
