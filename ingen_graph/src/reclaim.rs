//! The reclaimer, spec.md §4.6 "execute": "Any displaced objects are handed
//! to a reclaimer queue" and §4.1: "post-processor thread ... advances
//! reclaimer".
//!
//! Grounded on the same `rtrb` SPSC ring the rest of the pipeline uses for
//! audio-thread-to-other-thread handoff (`ingen_core::log::RtLogReceiver`
//! is the other user of this pattern in this workspace); pushing a raw
//! pointer onto a preallocated ring is wait-free, so `execute` never
//! allocates or blocks to get rid of something it just displaced.

use crate::block::Block;
use crate::compiled_graph::CompiledGraph;
use crate::edge::Edge;
use crate::port::Port;

/// Something displaced from a live structure during `execute`, kept alive
/// until the post-processor is sure no audio-thread reference to it
/// remains.
pub enum Garbage {
    CompiledGraph(*mut CompiledGraph),
    Block(Box<Block>),
    Ports(Box<[Port]>),
    Edges(Box<[Edge]>),
}
// SAFETY: Garbage is only ever constructed on the preprocessor/audio thread
// that displaced it and dropped on the post-processor thread, never
// accessed from more than one thread concurrently.
unsafe impl Send for Garbage {}

pub fn new_channel(capacity: usize) -> (GarbageSender, GarbageReceiver) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);
    (GarbageSender(tx), GarbageReceiver(rx))
}

pub struct GarbageSender(rtrb::Producer<Garbage>);
impl GarbageSender {
    /// Pushes one displaced object. Never blocks; if the ring is
    /// momentarily full the object is dropped immediately instead (only
    /// possible if the post-processor has stalled far behind the audio
    /// thread, at which point correctness has already been lost elsewhere).
    pub fn push(&mut self, garbage: Garbage) {
        if let Err(rtrb::PushError::Full(dropped)) = self.0.push(garbage) {
            drop_garbage(dropped);
        }
    }
}

pub struct GarbageReceiver(rtrb::Consumer<Garbage>);
impl GarbageReceiver {
    /// Drains and drops everything currently queued. Called once per
    /// post-process cycle.
    pub fn drain(&mut self) {
        while let Ok(g) = self.0.pop() {
            drop_garbage(g);
        }
    }
}

fn drop_garbage(garbage: Garbage) {
    match garbage {
        Garbage::CompiledGraph(ptr) => {
            if !ptr.is_null() {
                unsafe { drop(Box::from_raw(ptr)) };
            }
        }
        Garbage::Block(b) => drop(b),
        Garbage::Ports(p) => drop(p),
        Garbage::Edges(e) => drop(e),
    }
}
