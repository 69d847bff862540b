//! Raw buffer shapes shared by every block implementation, spec.md §4.2
//! "Buffer".
//!
//! Grounded on `knaster_primitives::block`'s `RawContiguousBlock` /
//! `RawAggregateBlock`: thin, `Copy` wrappers around a raw pointer plus a
//! capacity, so a plugin's `connect_port` can hold on to where its data
//! lives across many `run` calls without the allocator in `ingen_graph`
//! needing to know anything about plugin internals.
//!
//! # Safety
//!
//! Every variant here is a raw-pointer view. The caller (always
//! `ingen_graph::Port`/`CompiledGraph`) guarantees the pointee stays valid,
//! correctly sized, and free of other mutable references for as long as the
//! view is held.

use std::fmt;

/// One timestamped LV2-style event inside a [`SequenceBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    /// Frame offset within the current cycle this event applies at.
    pub frame: u32,
    /// The interned type of `body` (e.g. MIDI, an Atom object).
    pub ty: u32,
    pub body: Vec<u8>,
}

/// An append-only, capacity-bounded list of [`RawEvent`]s, the backing
/// storage for `event`/`atom` ports (spec.md §3 Port "type").
///
/// `append_event` never reallocates: once `capacity` bytes of event bodies
/// have been appended, further appends return `Err(BufferFull)` rather than
/// growing, which is what keeps it safe to call from the audio thread.
#[derive(Clone, Debug, Default)]
pub struct SequenceBuffer {
    events: Vec<RawEvent>,
    used_bytes: usize,
    capacity_bytes: usize,
}
/// Returned by [`SequenceBuffer::append_event`] when the buffer has no room
/// left for the requested event body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferFull;
impl fmt::Display for BufferFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sequence buffer is full")
    }
}
impl std::error::Error for BufferFull {}

impl SequenceBuffer {
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            events: Vec::new(),
            used_bytes: 0,
            capacity_bytes,
        }
    }
    pub fn clear(&mut self) {
        self.events.clear();
        self.used_bytes = 0;
    }
    /// Appends one event, keeping the list sorted only by insertion
    /// (callers merging multiple sources must interleave beforehand, see
    /// spec.md §4.3 "event sequences merge by interleaved timestamp order").
    pub fn append_event(&mut self, frame: u32, ty: u32, body: &[u8]) -> Result<(), BufferFull> {
        if self.used_bytes + body.len() > self.capacity_bytes {
            return Err(BufferFull);
        }
        self.used_bytes += body.len();
        self.events.push(RawEvent {
            frame,
            ty,
            body: body.to_vec(),
        });
        Ok(())
    }
    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Type-erased, `Copy` raw view over one cycle's worth of a port's buffer,
/// handed to a `BlockImpl::connect_port` call.
///
/// # Safety
/// See module docs: the pointee must outlive every `run`/`process` call made
/// while this view is connected.
#[derive(Clone, Copy)]
pub enum PortBuffer {
    /// `nframes` contiguous `f32` audio samples.
    Audio { ptr: *mut f32, nframes: usize },
    /// A single control scalar.
    Control(*mut f32),
    /// An event sequence, read or written through [`SequenceBuffer`].
    Sequence(*mut SequenceBuffer),
}
// SAFETY: PortBuffer is handed off between the preprocessor (which
// constructs it while holding the Store writer lock) and the audio thread
// (which dereferences it); the pointee's lifetime is guaranteed by the
// owning `Port`/`BufferFactory`, not by `Send`/`Sync`.
unsafe impl Send for PortBuffer {}

impl PortBuffer {
    /// # Safety
    /// The caller must ensure `self` currently holds an `Audio` pointer
    /// valid for `nframes` frames with no other mutable alias live.
    pub unsafe fn audio_slice(&self) -> &[f32] {
        match self {
            PortBuffer::Audio { ptr, nframes } => unsafe { std::slice::from_raw_parts(*ptr, *nframes) },
            _ => panic!("PortBuffer is not Audio"),
        }
    }
    /// # Safety
    /// See [`Self::audio_slice`].
    pub unsafe fn audio_slice_mut(&mut self) -> &mut [f32] {
        match self {
            PortBuffer::Audio { ptr, nframes } => unsafe { std::slice::from_raw_parts_mut(*ptr, *nframes) },
            _ => panic!("PortBuffer is not Audio"),
        }
    }
    /// # Safety
    /// The caller must ensure `self` currently holds a `Control` pointer
    /// with no other mutable alias live.
    pub unsafe fn control(&self) -> f32 {
        match self {
            PortBuffer::Control(ptr) => unsafe { **ptr },
            _ => panic!("PortBuffer is not Control"),
        }
    }
    /// # Safety
    /// See [`Self::control`].
    pub unsafe fn set_control(&mut self, value: f32) {
        match self {
            PortBuffer::Control(ptr) => unsafe { **ptr = value },
            _ => panic!("PortBuffer is not Control"),
        }
    }
    /// # Safety
    /// The caller must ensure `self` currently holds a `Sequence` pointer
    /// with no other mutable alias live.
    pub unsafe fn sequence(&mut self) -> &mut SequenceBuffer {
        match self {
            PortBuffer::Sequence(ptr) => unsafe { &mut **ptr },
            _ => panic!("PortBuffer is not Sequence"),
        }
    }
}
