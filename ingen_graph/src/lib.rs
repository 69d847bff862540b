#![allow(clippy::single_match)]
#![allow(clippy::new_without_default)]
//! # ingen_graph
//!
//! The dynamically modifiable realtime graph engine: the data model
//! (graphs/blocks/ports/edges), the three-stage event pipeline that mutates
//! it safely while the audio thread runs, graph compilation into a
//! topologically ordered (optionally parallel) schedule, the pooled buffer
//! model with polyphonic fan-in mixing, control bindings, and the
//! broadcaster.
//!
//! Built on `knaster_graph`'s division of labor: a two-phase buffer
//! allocator, a slotmap-keyed object arena, and an atomically swapped
//! compiled schedule so the audio thread always runs either the old or the
//! new graph, never a half-updated one.

pub mod audio_backend;
pub mod block;
mod broadcaster;
mod buffer;
mod compiled_graph;
mod context;
mod control_bindings;
pub mod cycle;
mod edge;
pub mod event;
mod graph;
mod port;
pub mod reclaim;
mod store;

pub use block::{Block, BlockKey, BlockKind, Poly};
pub use broadcaster::{Broadcaster, BroadcastMessage, ClientId, ClientSink, Response};
pub use buffer::{Buffer, BufferFactory};
pub use compiled_graph::{CompiledGraph, CycleError, ScheduleMode};
pub use context::{ProcessContext, RunContext};
pub use control_bindings::{CcFeedback, ControlBindings, MidiBinding, MidiCc, PortWrite, MIDI_EVENT};
pub use cycle::run_graph_cycle;
pub use edge::Edge;
pub use event::{execute, pre_process, DeltaMode, Event, EventReply, Execution, MarkKind, Pipeline, PreProcessed};
pub use graph::{GraphBody, GraphKey};
pub use port::{Port, PortDirection, PortType};
pub use store::Store;

/// Engine-wide constants used throughout compilation and buffer sizing.
pub mod defaults {
    /// Default maximum audio block size, in frames.
    pub const MAX_BLOCK_SIZE: usize = 4096;
    /// Default capacity, in bytes, for a new sequence port's buffer.
    pub const SEQUENCE_BUFFER_BYTES: usize = 4096;
}
