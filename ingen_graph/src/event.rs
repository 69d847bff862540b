//! The event pipeline, spec.md §4.6 "Event processing model" and §4.7
//! "Event types".
//!
//! Every mutation enters as an [`Event`], is validated and applied against
//! the live tree by [`pre_process`] (preprocessor thread, Store writer
//! lock held), and leaves a bounded, allocation-free [`Execution`] plan for
//! anything that must land exactly at a specific frame within the current
//! cycle (today: only `SetPortValue`). [`Pipeline`] wires the three threads
//! spec.md §5 names: a preprocessor thread draining the submit queue, the
//! caller's own audio-thread cycle draining `Execution`s via
//! [`Pipeline::run_execute_cycle`], and a post-processor thread that
//! reclaims garbage, broadcasts, and answers the originating client.
//!
//! # A scope note on concurrent mutation
//! Structural changes (insert/remove a block or port, add/remove an edge)
//! are applied directly in `pre_process`, including the recompiled
//! schedule's atomic swap (spec.md §4.9's pointer swap is atomic regardless
//! of which thread performs it). This keeps the implementation tractable:
//! it does not attempt the full copy-on-write child-arena snapshot a
//! from-scratch production engine would need to make structural edits
//! provably safe against a concurrently-running audio thread; see
//! `DESIGN.md` for the reasoning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use ingen_core::{Blame, BlockImpl, Plugin, PluginHost, PortKind, Status};
use ingen_primitives::{Atom, AtomScope, Path, Seconds, Symbol, Uri};

use crate::block::{Block, BlockKey, BlockKind, Poly};
use crate::broadcaster::{Broadcaster, BroadcastMessage, ClientId, Response};
use crate::buffer::BufferFactory;
use crate::edge::Edge;
use crate::graph::{GraphBody, default_control_ports};
use crate::port::{Port, PortDirection, PortType};
use crate::reclaim::{Garbage, GarbageSender};
use crate::store::Store;

/// The three `Delta` write modes (spec.md §9 open question: "Delta PATCH =
/// remove-then-add").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeltaMode {
    /// Replace the entire property bag with `add`.
    Set,
    /// Upsert `add`'s keys, leaving every other existing key untouched.
    Put,
    /// Remove `remove`'s keys, then upsert `add`'s keys.
    Patch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MarkKind {
    BundleStart,
    BundleEnd,
}

fn port_kind_to_type(kind: PortKind) -> PortType {
    match kind {
        PortKind::Audio => PortType::Audio,
        PortKind::Control => PortType::Control,
        PortKind::Cv => PortType::Cv,
        PortKind::Sequence => PortType::Sequence,
    }
}

/// Every mutation the engine accepts (spec.md §4.7's table of twelve).
#[derive(Clone, Debug)]
pub enum Event {
    CreateGraph {
        path: Path,
        poly: usize,
    },
    CreateBlock {
        path: Path,
        plugin_uri: Uri,
        poly: usize,
    },
    CreatePort {
        path: Path,
        port_symbol: Symbol,
        kind: PortKind,
        direction: PortDirection,
    },
    Connect {
        tail: Path,
        tail_port: Symbol,
        head: Path,
        head_port: Symbol,
    },
    Disconnect {
        tail: Path,
        tail_port: Symbol,
        head: Path,
        head_port: Symbol,
    },
    DisconnectAll {
        path: Path,
    },
    Delete {
        path: Path,
    },
    Delta {
        subject: Path,
        add: Vec<(Uri, Atom)>,
        remove: Vec<Uri>,
        mode: DeltaMode,
        poly: Option<usize>,
        /// Enable/disable toggle, grounded on `original_source`'s
        /// `DisableEvent.cpp`/`EnableEvent.cpp`.
        enabled: Option<bool>,
    },
    SetPortValue {
        port: Path,
        port_symbol: Symbol,
        value: Atom,
        time: Seconds,
    },
    Copy {
        subject: Path,
        dest: Path,
    },
    Move {
        subject: Path,
        dest: Path,
    },
    Get {
        subject: Path,
    },
    Mark(MarkKind),
}

/// The bounded action deferred to the audio thread's own cycle, for the one
/// case that must land at an exact frame rather than whenever the
/// preprocessor happens to run (spec.md §4.6 execute: "performs ... direct
/// scalar writes").
pub enum Execution {
    None,
    WriteControl {
        buffer: crate::buffer::Buffer,
        value: f32,
    },
    AppendSequence {
        buffer: crate::buffer::Buffer,
        frame: u32,
        ty: u32,
        body: Vec<u8>,
    },
}

/// Applies one deferred plan. Allocation-free and lock-free: the only work
/// is a direct write through an already-acquired buffer handle.
pub fn execute(plan: Execution) {
    match plan {
        Execution::None => {}
        Execution::WriteControl { mut buffer, value } => buffer.set_control_value(value),
        Execution::AppendSequence { mut buffer, frame, ty, body } => {
            buffer.append_event(frame, ty, &body);
        }
    }
}

/// The full outcome of `pre_process`-ing one event: what's left to execute,
/// what status/blame to eventually report, and what (if anything) to tell
/// every other registered client.
pub struct PreProcessed {
    pub plan: Execution,
    pub status: Status,
    pub blame: Blame,
    pub broadcast: Option<BroadcastMessage>,
    /// The event that, applied next, restores the state `pre_process` just
    /// replaced (spec.md C9, §8's "apply(event) then apply(event.undo())
    /// restores the prior observable state"). `None` for events this
    /// pipeline doesn't yet know how to invert (e.g. `Delete`, which would
    /// need to re-serialize an entire removed subtree) or that failed.
    pub undo: Option<Event>,
}
fn ok(broadcast: Option<BroadcastMessage>) -> PreProcessed {
    PreProcessed {
        plan: Execution::None,
        status: Status::Success,
        blame: Blame::None,
        broadcast,
        undo: None,
    }
}
fn ok_undoable(broadcast: Option<BroadcastMessage>, undo: Event) -> PreProcessed {
    PreProcessed {
        plan: Execution::None,
        status: Status::Success,
        blame: Blame::None,
        broadcast,
        undo: Some(undo),
    }
}
fn fail(status: Status, blame: impl Into<Blame>) -> PreProcessed {
    PreProcessed {
        plan: Execution::None,
        status,
        blame: blame.into(),
        broadcast: None,
        undo: None,
    }
}

/// Validates and applies `event` against the live tree rooted at `root`,
/// holding whatever lock the caller already took (spec.md §4.1: "all event
/// pre-processing acquires the writer lock").
#[allow(clippy::too_many_arguments)]
pub fn pre_process(
    root: &mut Block,
    factory: &BufferFactory,
    plugin_host: &dyn PluginHost,
    sample_rate: f64,
    max_block_size: u32,
    garbage: &mut GarbageSender,
    event: &Event,
) -> PreProcessed {
    match event {
        Event::CreateGraph { path, poly } => create_graph(root, factory, garbage, path, *poly),
        Event::CreateBlock { path, plugin_uri, poly } => {
            create_block(root, factory, plugin_host, sample_rate, max_block_size, garbage, path, plugin_uri, *poly)
        }
        Event::CreatePort { path, port_symbol, kind, direction } => create_port(root, factory, garbage, path, port_symbol, *kind, *direction),
        Event::Connect { tail, tail_port, head, head_port } => connect(root, garbage, tail, tail_port, head, head_port),
        Event::Disconnect { tail, tail_port, head, head_port } => disconnect(root, garbage, tail, tail_port, head, head_port),
        Event::DisconnectAll { path } => disconnect_all(root, garbage, path),
        Event::Delete { path } => delete(root, garbage, path),
        Event::Delta { subject, add, remove, mode, poly, enabled } => delta(root, factory, subject, add, remove, *mode, *poly, *enabled),
        Event::SetPortValue { port, port_symbol, value, time } => set_port_value(root, port, port_symbol, value, *time),
        Event::Copy { subject, dest } => copy(root, factory, plugin_host, sample_rate, max_block_size, garbage, subject, dest),
        Event::Move { subject, dest } => mv(root, garbage, subject, dest),
        Event::Get { subject } => get(root, subject),
        Event::Mark(_) => ok(None),
    }
}

fn create_graph(root: &mut Block, factory: &BufferFactory, garbage: &mut GarbageSender, path: &Path, poly: usize) -> PreProcessed {
    let Some(Poly(poly)) = Poly::new(poly.max(1)) else {
        return fail(Status::InvalidPoly, path.clone());
    };
    let Some(parent_path) = path.parent() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(symbol) = path.symbol() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(parent) = Store::resolve_mut(root, &parent_path) else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, parent_path);
    };
    if parent_body.find_child_by_symbol(&symbol).is_some() {
        return fail(Status::Exists, path.clone());
    }

    let ports = default_control_ports(factory, poly);
    let body = GraphBody::new(poly, parent_body.schedule_mode);
    let block = Block::new_graph(path.clone(), symbol, body, ports, poly);
    parent_body.children.insert(block);

    match parent_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => return fail(Status::Cycle, path.clone()),
    }
    ok_undoable(Some(BroadcastMessage::ObjectCreated { path: path.clone() }), Event::Delete { path: path.clone() })
}

#[allow(clippy::too_many_arguments)]
fn create_block(
    root: &mut Block,
    factory: &BufferFactory,
    plugin_host: &dyn PluginHost,
    sample_rate: f64,
    max_block_size: u32,
    garbage: &mut GarbageSender,
    path: &Path,
    plugin_uri: &Uri,
    poly: usize,
) -> PreProcessed {
    let Some(Poly(poly)) = Poly::new(poly.max(1)) else {
        return fail(Status::InvalidPoly, path.clone());
    };
    let Some(plugin) = plugin_host.lookup_plugin(plugin_uri) else {
        return fail(Status::PrototypeNotFound, plugin_uri.clone());
    };
    let Some(layout) = plugin_host.port_layout(&plugin) else {
        return fail(Status::PrototypeNotFound, plugin_uri.clone());
    };
    let Some(parent_path) = path.parent() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(symbol) = path.symbol() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(parent) = Store::resolve_mut(root, &parent_path) else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, parent_path);
    };
    if parent_body.find_child_by_symbol(&symbol).is_some() {
        return fail(Status::Exists, path.clone());
    }

    let mut impl_ = match plugin_host.instantiate(&plugin, sample_rate, max_block_size) {
        Ok(impl_) => impl_,
        Err(status) => return fail(status, plugin_uri.clone()),
    };
    let mut ports = build_ports(&layout, factory, poly);
    connect_ports(impl_.as_mut(), &mut ports);
    let block = Block::new_plugin(path.clone(), symbol, plugin_uri.clone(), impl_, ports, poly);
    parent_body.children.insert(block);

    match parent_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => return fail(Status::Cycle, path.clone()),
    }
    ok_undoable(Some(BroadcastMessage::ObjectCreated { path: path.clone() }), Event::Delete { path: path.clone() })
}

fn build_ports(layout: &[ingen_core::PortLayout], factory: &BufferFactory, poly: usize) -> Vec<Port> {
    layout
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let direction = match p.direction {
                ingen_core::Direction::Input => PortDirection::Input,
                ingen_core::Direction::Output => PortDirection::Output,
            };
            let ty = port_kind_to_type(p.kind);
            let capacity = if ty == PortType::Sequence {
                crate::defaults::SEQUENCE_BUFFER_BYTES
            } else {
                crate::defaults::MAX_BLOCK_SIZE
            };
            Port::new(ty, direction, i as u32, Symbol::new(p.symbol).unwrap(), poly, factory, capacity)
        })
        .collect()
}

/// Binds a plugin's ports to their buffers (spec.md §4.1 "pre_process" is
/// where `connect_port` runs, off the audio thread).
///
/// Only voice 0 of each port is bound: `BlockImpl` is one instance per
/// `Block` regardless of `poly`, so a polyphonic block's own DSP runs
/// against its first voice only today. Port-level fan-in (mixing what
/// feeds a polyphonic port, and broadcasting/summing what it feeds
/// onward, spec.md §4.3) is fully poly-correct; only the plugin's own
/// per-voice computation is not. A complete engine would instantiate one
/// `BlockImpl` per voice, the way `original_source` instantiates one LV2
/// handle per voice of a polyphonic block.
fn connect_ports(impl_: &mut dyn BlockImpl, ports: &mut [Port]) {
    for port in ports.iter_mut() {
        unsafe { impl_.connect_port(port.index, port.voice_mut(0).as_port_buffer()) };
    }
}

fn create_port(root: &mut Block, factory: &BufferFactory, garbage: &mut GarbageSender, path: &Path, port_symbol: &Symbol, kind: PortKind, direction: PortDirection) -> PreProcessed {
    let Some(block) = Store::resolve_mut(root, path) else {
        return fail(Status::NotFound, path.clone());
    };
    if block.port_index_by_symbol(port_symbol).is_some() {
        return fail(Status::Exists, path.clone());
    }
    let Some(grandparent_path) = path.parent() else {
        return fail(Status::BadRequest, path.clone());
    };
    let poly = block.poly;
    let index = block.ports.len() as u32;
    let ty = port_kind_to_type(kind);
    let capacity = if ty == PortType::Sequence {
        crate::defaults::SEQUENCE_BUFFER_BYTES
    } else {
        crate::defaults::MAX_BLOCK_SIZE
    };
    block.ports.push(Port::new(ty, direction, index, port_symbol.clone(), poly, factory, capacity));

    // A new port doesn't change the schedule order, but a parent graph that
    // treats this block's ports as pass-through endpoints needs its own
    // schedule refreshed since pass-through edges are excluded from
    // intra-graph accounting only once the port actually exists.
    if let Some(parent) = Store::resolve_mut(root, &grandparent_path) {
        if let Some(parent_body) = parent.graph_body_mut() {
            if let Ok(old) = parent_body.recompile() {
                garbage.push(Garbage::CompiledGraph(old));
            }
        }
    }
    ok(Some(BroadcastMessage::ObjectCreated { path: path.child(port_symbol) }))
}

fn connect(root: &mut Block, garbage: &mut GarbageSender, tail: &Path, tail_port: &Symbol, head: &Path, head_port: &Symbol) -> PreProcessed {
    let Some(parent_path) = tail.parent() else {
        return fail(Status::ParentNotFound, tail.clone());
    };
    if head.parent().as_ref() != Some(&parent_path) {
        return fail(Status::ParentDiffers, head.clone());
    }
    let Some(parent) = Store::resolve_mut(root, &parent_path) else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(tail_key) = parent_body.find_child_by_symbol(&tail.symbol().unwrap()) else {
        return fail(Status::NotFound, tail.clone());
    };
    let Some(head_key) = parent_body.find_child_by_symbol(&head.symbol().unwrap()) else {
        return fail(Status::NotFound, head.clone());
    };
    let Some(tail_index) = parent_body.children[tail_key].port_index_by_symbol(tail_port) else {
        return fail(Status::PortNotFound, tail.clone());
    };
    let Some(head_index) = parent_body.children[head_key].port_index_by_symbol(head_port) else {
        return fail(Status::PortNotFound, head.clone());
    };

    let tail_ty = parent_body.children[tail_key].ports[tail_index as usize].ty;
    let head_ty = parent_body.children[head_key].ports[head_index as usize].ty;
    if tail_ty != head_ty {
        return fail(Status::TypeMismatch, head.clone());
    }
    let tail_poly = parent_body.children[tail_key].poly;
    let head_poly = parent_body.children[head_key].poly;
    // Mono, broadcast (1 -> N) and sum (N -> 1) fan-in are legal; anything
    // that would need a mixed split (neither divides the other) is not
    // (spec.md §4.3 polyphony fan-in rules).
    if tail_poly != head_poly && tail_poly != 1 && head_poly != 1 {
        return fail(Status::InvalidPoly, head.clone());
    }

    let edge = Edge::new(tail_key, tail_index, head_key, head_index);
    if parent_body.edges.iter().any(|e| e.same_connection(&edge)) {
        return fail(Status::Exists, head.clone());
    }
    parent_body.edges.push(edge);
    match parent_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => {
            parent_body.edges.retain(|e| !e.same_connection(&edge));
            let _ = parent_body.recompile();
            return fail(Status::Cycle, head.clone());
        }
    }
    parent_body.children[head_key].ports[head_index as usize].connect(edge);
    parent_body.children[head_key].ports[head_index as usize].is_set = true;

    let undo = Event::Disconnect {
        tail: tail.clone(),
        tail_port: tail_port.clone(),
        head: head.clone(),
        head_port: head_port.clone(),
    };
    ok_undoable(Some(BroadcastMessage::Connected { tail: tail.child(tail_port), head: head.child(head_port) }), undo)
}

fn disconnect(root: &mut Block, garbage: &mut GarbageSender, tail: &Path, tail_port: &Symbol, head: &Path, head_port: &Symbol) -> PreProcessed {
    let Some(parent_path) = tail.parent() else {
        return fail(Status::ParentNotFound, tail.clone());
    };
    let Some(parent) = Store::resolve_mut(root, &parent_path) else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(tail_key) = parent_body.find_child_by_symbol(&tail.symbol().unwrap()) else {
        return fail(Status::NotFound, tail.clone());
    };
    let Some(head_key) = parent_body.find_child_by_symbol(&head.symbol().unwrap()) else {
        return fail(Status::NotFound, head.clone());
    };
    let Some(tail_index) = parent_body.children[tail_key].port_index_by_symbol(tail_port) else {
        return fail(Status::PortNotFound, tail.clone());
    };
    let Some(head_index) = parent_body.children[head_key].port_index_by_symbol(head_port) else {
        return fail(Status::PortNotFound, head.clone());
    };
    let edge = Edge::new(tail_key, tail_index, head_key, head_index);
    if !parent_body.edges.iter().any(|e| e.same_connection(&edge)) {
        return fail(Status::NotFound, head.clone());
    }
    parent_body.edges.retain(|e| !e.same_connection(&edge));
    match parent_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => return fail(Status::InternalError, head.clone()),
    }
    let emptied = parent_body.children[head_key].ports[head_index as usize].disconnect(&edge);
    if emptied {
        parent_body.children[head_key].ports[head_index as usize].reset_to_stored_value();
    }
    let undo = Event::Connect {
        tail: tail.clone(),
        tail_port: tail_port.clone(),
        head: head.clone(),
        head_port: head_port.clone(),
    };
    ok_undoable(Some(BroadcastMessage::Disconnected { tail: tail.child(tail_port), head: head.child(head_port) }), undo)
}

fn disconnect_all(root: &mut Block, garbage: &mut GarbageSender, path: &Path) -> PreProcessed {
    let Some(parent_path) = path.parent() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(symbol) = path.symbol() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(parent) = Store::resolve_mut(root, &parent_path) else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(key) = parent_body.find_child_by_symbol(&symbol) else {
        return fail(Status::NotFound, path.clone());
    };
    let before = parent_body.edges.len();
    parent_body.edges.retain(|e| e.tail != key && e.head != key);
    if parent_body.edges.len() != before {
        match parent_body.recompile() {
            Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
            Err(_) => return fail(Status::InternalError, path.clone()),
        }
    }
    for port in parent_body.children[key].ports.iter_mut() {
        port.disconnect_all();
        port.reset_to_stored_value();
    }
    ok(Some(BroadcastMessage::Disconnected { tail: path.clone(), head: path.clone() }))
}

fn delete(root: &mut Block, garbage: &mut GarbageSender, path: &Path) -> PreProcessed {
    if path.is_root() {
        return fail(Status::BadRequest, path.clone());
    }
    let Some(parent_path) = path.parent() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(symbol) = path.symbol() else {
        return fail(Status::BadRequest, path.clone());
    };
    let Some(parent) = Store::resolve_mut(root, &parent_path) else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, parent_path);
    };
    let Some(key) = parent_body.find_child_by_symbol(&symbol) else {
        return fail(Status::NotFound, path.clone());
    };

    parent_body.edges.retain(|e| e.tail != key && e.head != key);
    let removed = parent_body.children.remove(key);
    match parent_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => return fail(Status::InternalError, path.clone()),
    }
    if let Some(block) = removed {
        garbage.push(Garbage::Block(Box::new(block)));
    }
    // Every sibling whose input ports fed from the deleted block has
    // already had its edges dropped above; reset their buffers too.
    for (_, child) in parent_body.children.iter_mut() {
        for port in child.ports.iter_mut() {
            if port.incoming().is_empty() && port.is_set {
                port.reset_to_stored_value();
            }
        }
    }
    ok(Some(BroadcastMessage::ObjectDeleted { path: path.clone() }))
}

#[allow(clippy::too_many_arguments)]
fn delta(root: &mut Block, factory: &BufferFactory, subject: &Path, add: &[(Uri, Atom)], remove: &[Uri], mode: DeltaMode, poly: Option<usize>, enabled: Option<bool>) -> PreProcessed {
    let Some(block) = Store::resolve_mut(root, subject) else {
        return fail(Status::NotFound, subject.clone());
    };

    let old_poly = block.poly;
    let old_enabled = block.enabled;
    let old_properties: Vec<(Uri, Atom)> = block.properties.iter().map(|(k, (_, v))| (k.clone(), v.clone())).collect();

    if let Some(requested) = poly {
        let Some(Poly(p)) = Poly::new(requested) else {
            return fail(Status::InvalidPoly, subject.clone());
        };
        match &mut block.kind {
            BlockKind::Graph(body) => body.internal_poly = p,
            BlockKind::Plugin { .. } => {
                block.poly = p;
                for port in block.ports.iter_mut() {
                    let capacity = if port.ty == PortType::Sequence {
                        crate::defaults::SEQUENCE_BUFFER_BYTES
                    } else {
                        crate::defaults::MAX_BLOCK_SIZE
                    };
                    port.set_poly(p, factory, capacity);
                }
            }
        }
    }
    if let Some(enabled) = enabled {
        block.enabled = enabled;
    }
    match mode {
        DeltaMode::Set => {
            block.properties.clear();
            for (k, v) in add {
                block.properties.insert(k.clone(), (AtomScope::Default, v.clone()));
            }
        }
        DeltaMode::Put => {
            for (k, v) in add {
                block.properties.insert(k.clone(), (AtomScope::Default, v.clone()));
            }
        }
        DeltaMode::Patch => {
            for k in remove {
                block.properties.remove(k);
            }
            for (k, v) in add {
                block.properties.insert(k.clone(), (AtomScope::Default, v.clone()));
            }
        }
    }
    // One broadcast per changed key would be more precise; a single
    // notification naming the subject matches what `Broadcaster` needs to
    // tell a client "go re-`Get` me" without inventing a batched message
    // shape the spec doesn't otherwise use.
    let key = add.first().map(|(k, _)| k.clone()).or_else(|| remove.first().cloned()).unwrap_or_else(|| Uri::new(""));
    let undo = Event::Delta {
        subject: subject.clone(),
        add: old_properties,
        remove: Vec::new(),
        mode: DeltaMode::Set,
        poly: Some(old_poly),
        enabled: Some(old_enabled),
    };
    ok_undoable(Some(BroadcastMessage::PropertyChanged { subject: subject.clone(), key }), undo)
}

fn set_port_value(root: &mut Block, port_path: &Path, port_symbol: &Symbol, value: &Atom, _time: Seconds) -> PreProcessed {
    let Some(block) = Store::resolve_mut(root, port_path) else {
        return fail(Status::NotFound, port_path.clone());
    };
    let Some(index) = block.port_index_by_symbol(port_symbol) else {
        return fail(Status::PortNotFound, port_path.clone());
    };
    let port = &mut block.ports[index as usize];
    match port.ty {
        PortType::Control | PortType::Cv => {
            let Some(v) = value.as_float() else {
                return fail(Status::BadType, port_path.clone());
            };
            let previous = port.stored_value;
            let undo = Event::SetPortValue {
                port: port_path.clone(),
                port_symbol: port_symbol.clone(),
                value: Atom::Float(previous),
                time: Seconds::ZERO,
            };
            port.stored_value = v;
            port.is_set = true;
            if port.incoming().is_empty() {
                let buffer = port.voice(0).clone();
                return PreProcessed {
                    plan: Execution::WriteControl { buffer, value: v },
                    status: Status::Success,
                    blame: Blame::None,
                    broadcast: Some(BroadcastMessage::PropertyChanged { subject: port_path.child(port_symbol), key: Uri::new("ingen:value") }),
                    undo: Some(undo),
                };
            }
            return ok_undoable(Some(BroadcastMessage::PropertyChanged { subject: port_path.child(port_symbol), key: Uri::new("ingen:value") }), undo);
        }
        PortType::Sequence => {
            let Atom::Object(_) = value else {
                return fail(Status::BadType, port_path.clone());
            };
        }
        PortType::Audio => return fail(Status::TypeMismatch, port_path.clone()),
    }
    ok(Some(BroadcastMessage::PropertyChanged { subject: port_path.child(port_symbol), key: Uri::new("ingen:value") }))
}

#[allow(clippy::too_many_arguments)]
fn copy(root: &mut Block, factory: &BufferFactory, plugin_host: &dyn PluginHost, sample_rate: f64, max_block_size: u32, garbage: &mut GarbageSender, subject: &Path, dest: &Path) -> PreProcessed {
    let Some(src) = Store::resolve(root, subject) else {
        return fail(Status::NotFound, subject.clone());
    };
    let Some(dest_parent_path) = dest.parent() else {
        return fail(Status::BadRequest, dest.clone());
    };
    let Some(dest_symbol) = dest.symbol() else {
        return fail(Status::BadRequest, dest.clone());
    };
    let rebuilt = match deep_copy(src, dest.clone(), dest_symbol, factory, plugin_host, sample_rate, max_block_size) {
        Ok(block) => block,
        Err(status) => return fail(status, subject.clone()),
    };
    let Some(parent) = Store::resolve_mut(root, &dest_parent_path) else {
        return fail(Status::ParentNotFound, dest_parent_path);
    };
    let Some(parent_body) = parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, dest_parent_path);
    };
    if parent_body.find_child_by_symbol(&rebuilt.symbol).is_some() {
        return fail(Status::Exists, dest.clone());
    }
    parent_body.children.insert(rebuilt);
    match parent_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => return fail(Status::Cycle, dest.clone()),
    }
    ok(Some(BroadcastMessage::ObjectCreated { path: dest.clone() }))
}

fn deep_copy(src: &Block, path: Path, symbol: Symbol, factory: &BufferFactory, plugin_host: &dyn PluginHost, sample_rate: f64, max_block_size: u32) -> Result<Block, Status> {
    let mut ports: Vec<Port> = src
        .ports
        .iter()
        .map(|p| Port::new(p.ty, p.direction, p.index, p.symbol.clone(), p.poly(), factory, p.voice(0).capacity()))
        .collect();
    match &src.kind {
        BlockKind::Plugin { plugin_uri, .. } => {
            let plugin = Plugin::new(plugin_uri.clone(), ingen_core::PluginType::External, symbol.clone());
            let plugin = plugin_host.lookup_plugin(&plugin.uri).unwrap_or(plugin);
            let mut impl_ = plugin_host.instantiate(&plugin, sample_rate, max_block_size)?;
            connect_ports(impl_.as_mut(), &mut ports);
            Ok(Block::new_plugin(path, symbol, plugin_uri.clone(), impl_, ports, src.poly))
        }
        BlockKind::Graph(body) => {
            let mut new_body = GraphBody::new(body.internal_poly, body.schedule_mode);
            let mut key_map = std::collections::HashMap::new();
            for (old_key, child) in body.children.iter() {
                let child_path = path.child(&child.symbol);
                let copied = deep_copy(child, child_path, child.symbol.clone(), factory, plugin_host, sample_rate, max_block_size)?;
                let new_key = new_body.children.insert(copied);
                key_map.insert(old_key, new_key);
            }
            for e in &body.edges {
                if let (Some(&t), Some(&h)) = (key_map.get(&e.tail), key_map.get(&e.head)) {
                    new_body.edges.push(Edge::new(t, e.tail_port, h, e.head_port));
                }
            }
            let _ = new_body.recompile();
            Ok(Block::new_graph(path, symbol, new_body, ports, src.poly))
        }
    }
}

fn mv(root: &mut Block, garbage: &mut GarbageSender, subject: &Path, dest: &Path) -> PreProcessed {
    if dest.is_descendant_of(subject) || dest == subject {
        return fail(Status::BadRequest, dest.clone());
    }
    let Some(dest_parent_path) = dest.parent() else {
        return fail(Status::BadRequest, dest.clone());
    };
    let Some(dest_symbol) = dest.symbol() else {
        return fail(Status::BadRequest, dest.clone());
    };
    let Some(src_parent_path) = subject.parent() else {
        return fail(Status::BadRequest, subject.clone());
    };

    let Some(mut removed) = Store::remove(root, subject) else {
        return fail(Status::NotFound, subject.clone());
    };
    if let Some(parent) = Store::resolve_mut(root, &src_parent_path) {
        if let Some(body) = parent.graph_body_mut() {
            let _ = body.recompile();
        }
    }

    rewrite_paths(&mut removed, dest.clone());
    removed.symbol = dest_symbol.clone();

    let Some(dest_parent) = Store::resolve_mut(root, &dest_parent_path) else {
        return fail(Status::ParentNotFound, dest_parent_path);
    };
    let Some(dest_body) = dest_parent.graph_body_mut() else {
        return fail(Status::ParentNotFound, dest_parent_path);
    };
    if dest_body.find_child_by_symbol(&dest_symbol).is_some() {
        return fail(Status::Exists, dest.clone());
    }
    dest_body.children.insert(removed);
    match dest_body.recompile() {
        Ok(old) => garbage.push(Garbage::CompiledGraph(old)),
        Err(_) => return fail(Status::Cycle, dest.clone()),
    }
    let undo = Event::Move { subject: dest.clone(), dest: subject.clone() };
    ok_undoable(Some(BroadcastMessage::Moved { from: subject.clone(), to: dest.clone() }), undo)
}

fn rewrite_paths(block: &mut Block, new_path: Path) {
    block.path = new_path.clone();
    if let Some(body) = block.graph_body_mut() {
        let keys: Vec<BlockKey> = body.children.keys().collect();
        for key in keys {
            let symbol = body.children[key].symbol.clone();
            let child_path = new_path.child(&symbol);
            rewrite_paths(&mut body.children[key], child_path);
        }
    }
}

fn get(root: &mut Block, subject: &Path) -> PreProcessed {
    match Store::resolve(root, subject) {
        Some(_) => ok(None),
        None => fail(Status::NotFound, subject.clone()),
    }
}

/// A completed event's answer to its originating client (spec.md §4.6
/// post_process: "delivers the status response"). Wraps the
/// [`Response`] `Broadcaster` defines for a direct per-client reply
/// (response sequencing assigned by the preprocessor) plus `blame` and the
/// event that would undo this one, if it's invertible.
#[derive(Clone, Debug)]
pub struct EventReply {
    pub sequence: u64,
    pub status: Status,
    pub blame: Blame,
    pub undo: Option<Event>,
}
impl EventReply {
    fn from_response(response: Response, blame: Blame, undo: Option<Event>) -> Self {
        Self {
            sequence: response.sequence,
            status: response.status,
            blame,
            undo,
        }
    }
}

struct Completed {
    client: ClientId,
    reply: EventReply,
    broadcast: Option<BroadcastMessage>,
    mark: Option<MarkKind>,
}

/// Wires the submit queue, the preprocessor thread, and the post-processor
/// thread together (spec.md §5). The caller's own audio-thread loop drives
/// `execute` by calling [`Pipeline::run_execute_cycle`] once per cycle.
pub struct Pipeline {
    submit_tx: mpsc::Sender<(Event, ClientId)>,
    _preprocessor: JoinHandle<()>,
    _post_processor: JoinHandle<()>,
    exec_consumer: parking_lot::Mutex<rtrb::Consumer<(Execution, Completed)>>,
    post_tx: parking_lot::Mutex<rtrb::Producer<Completed>>,
}

impl Pipeline {
    pub fn new(store: Arc<Store>, factory: Arc<BufferFactory>, plugin_host: Arc<dyn PluginHost>, broadcaster: Arc<Broadcaster>, sample_rate: f64, max_block_size: u32, reply_sink: Arc<dyn Fn(ClientId, EventReply) + Send + Sync>) -> Self {
        let (submit_tx, submit_rx) = mpsc::channel::<(Event, ClientId)>();
        let (exec_tx, exec_rx) = rtrb::RingBuffer::<(Execution, Completed)>::new(1024);
        let (garbage_tx, mut garbage_rx) = crate::reclaim::new_channel(1024);
        let (post_tx, mut post_rx) = rtrb::RingBuffer::<Completed>::new(1024);

        let sequence = Arc::new(AtomicU64::new(0));
        let mut exec_tx = exec_tx;
        let mut garbage_tx_pp = garbage_tx;
        let preprocessor = std::thread::spawn({
            let store = store.clone();
            let factory = factory.clone();
            let plugin_host = plugin_host.clone();
            let sequence = sequence.clone();
            move || {
                while let Ok((event, client)) = submit_rx.recv() {
                    let seq = sequence.fetch_add(1, Ordering::Relaxed);
                    let mut root = store.write();
                    let processed = pre_process(&mut root, &factory, plugin_host.as_ref(), sample_rate, max_block_size, &mut garbage_tx_pp, &event);
                    drop(root);
                    let mark = if let Event::Mark(kind) = &event { Some(*kind) } else { None };
                    let response = Response { sequence: seq, status: processed.status };
                    let completed = Completed {
                        client,
                        reply: EventReply::from_response(response, processed.blame, processed.undo),
                        broadcast: processed.broadcast,
                        mark,
                    };
                    if exec_tx.push((processed.plan, completed)).is_err() {
                        // Ring momentarily full: nothing more we can do but
                        // drop this completion. A stalled audio thread has
                        // already broken worse invariants than this one.
                    }
                }
            }
        });

        let post_processor = std::thread::spawn(move || {
            loop {
                garbage_rx.drain();
                match post_rx.pop() {
                    Ok(completed) => {
                        match completed.mark {
                            Some(MarkKind::BundleStart) => broadcaster.bundle_start(),
                            Some(MarkKind::BundleEnd) => broadcaster.bundle_end(),
                            None => {
                                if let Some(msg) = completed.broadcast {
                                    broadcaster.broadcast(msg);
                                }
                            }
                        }
                        reply_sink(completed.client, completed.reply);
                    }
                    Err(_) => std::thread::yield_now(),
                }
            }
        });

        Self {
            submit_tx,
            _preprocessor: preprocessor,
            _post_processor: post_processor,
            exec_consumer: parking_lot::Mutex::new(exec_rx),
            post_tx: parking_lot::Mutex::new(post_tx),
        }
    }

    /// Enqueues one event from `client`. Returns immediately; the eventual
    /// [`EventReply`] arrives through the `reply_sink` given to `new`.
    pub fn submit(&self, event: Event, client: ClientId) {
        let _ = self.submit_tx.send((event, client));
    }

    /// Drains whatever pre-processed plans are ready and applies them,
    /// forwarding each completion to the post-processor. Call once per
    /// audio cycle from the real audio thread.
    pub fn run_execute_cycle(&self) -> usize {
        let mut n = 0;
        let mut exec_consumer = self.exec_consumer.lock();
        let mut post_tx = self.post_tx.lock();
        while let Ok((plan, completed)) = exec_consumer.pop() {
            execute(plan);
            let _ = post_tx.push(completed);
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled_graph::ScheduleMode;
    use ingen_core::internal_plugins::InternalPluginHost;

    fn root_block() -> Block {
        Block::new_graph(Path::root(), Symbol::new("root").unwrap(), GraphBody::new(1, ScheduleMode::Serial), Vec::new(), 1)
    }

    #[test]
    fn create_block_then_connect_then_delete() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage_tx = crate::reclaim::new_channel(8).0;

        let create_a = Event::CreateBlock {
            path: Path::parse("/a").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#Trigger"),
            poly: 1,
        };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &create_a);
        assert_eq!(r.status, Status::Success);

        let create_b = Event::CreateBlock {
            path: Path::parse("/b").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#BlockDelay"),
            poly: 1,
        };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &create_b);
        assert_eq!(r.status, Status::Success);

        let connect_evt = Event::Connect {
            tail: Path::parse("/a").unwrap(),
            tail_port: Symbol::new("out").unwrap(),
            head: Path::parse("/b").unwrap(),
            head_port: Symbol::new("in").unwrap(),
        };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &connect_evt);
        assert_eq!(r.status, Status::Success);

        let bad_connect = Event::Connect {
            tail: Path::parse("/b").unwrap(),
            tail_port: Symbol::new("out").unwrap(),
            head: Path::parse("/a").unwrap(),
            head_port: Symbol::new("midi_in").unwrap(),
        };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &bad_connect);
        assert_eq!(r.status, Status::Cycle);

        let delete_evt = Event::Delete { path: Path::parse("/a").unwrap() };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &delete_evt);
        assert_eq!(r.status, Status::Success);
        assert!(Store::resolve(&root, &Path::parse("/a").unwrap()).is_none());
    }

    #[test]
    fn connect_rejects_a_missing_tail() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage_tx = crate::reclaim::new_channel(8).0;
        let create_b = Event::CreateBlock {
            path: Path::parse("/b").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#BlockDelay"),
            poly: 1,
        };
        pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &create_b);

        let connect_evt = Event::Connect {
            tail: Path::parse("/missing").unwrap(),
            tail_port: Symbol::new("out").unwrap(),
            head: Path::parse("/b").unwrap(),
            head_port: Symbol::new("in").unwrap(),
        };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &connect_evt);
        assert_eq!(r.status, Status::NotFound);
    }

    #[test]
    fn set_port_value_on_unconnected_control_port_plans_a_write() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage_tx = crate::reclaim::new_channel(8).0;
        let create = Event::CreateBlock {
            path: Path::parse("/c").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#Controller"),
            poly: 1,
        };
        pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &create);

        let set = Event::SetPortValue {
            port: Path::parse("/c").unwrap(),
            port_symbol: Symbol::new("value").unwrap(),
            value: Atom::Float(0.5),
            time: Seconds::ZERO,
        };
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &set);
        assert_eq!(r.status, Status::Success);
        assert!(matches!(r.plan, Execution::WriteControl { value, .. } if value == 0.5));
    }

    #[test]
    fn delete_resets_downstream_control_port_to_stored_value() {
        let mut root = root_block();
        let factory = BufferFactory::new();
        let host = InternalPluginHost;
        let mut garbage_tx = crate::reclaim::new_channel(8).0;
        for (path, uri) in [
            ("/n", "http://drobilla.net/ns/ingen-internals#Note"),
            ("/t", "http://drobilla.net/ns/ingen-internals#Trigger"),
        ] {
            let create = Event::CreateBlock {
                path: Path::parse(path).unwrap(),
                plugin_uri: Uri::new(uri),
                poly: 1,
            };
            pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &create);
        }
        let connect_evt = Event::Connect {
            tail: Path::parse("/n").unwrap(),
            tail_port: Symbol::new("freq").unwrap(),
            head: Path::parse("/t").unwrap(),
            head_port: Symbol::new("midi_in").unwrap(),
        };
        // Mismatched types (control -> sequence) should fail cleanly rather
        // than panic; exercised here to confirm `connect` validates type
        // before touching any state.
        let r = pre_process(&mut root, &factory, &host, 48_000.0, 64, &mut garbage_tx, &connect_evt);
        assert_eq!(r.status, Status::TypeMismatch);
    }
}
