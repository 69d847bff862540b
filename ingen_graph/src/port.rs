//! Ports, spec.md §4.3 "Port (C2)".
//!
//! A port owns one [`Buffer`] handle per polyphonic voice. Grounded on
//! `knaster_graph::node::Node::node_inputs`/`node_output`'s separation of
//! "what my buffers currently point to" from the block that reads/writes
//! them, generalized to the fan-in mixing rules spec.md §4.3 describes for
//! each port type.

use ingen_primitives::Symbol;
use smallvec::SmallVec;

use crate::buffer::{Buffer, BufferFactory};
use crate::edge::Edge;

/// The four concrete port payload kinds (spec.md §3 "Port": "type").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortType {
    Audio,
    Cv,
    Control,
    Sequence,
}
impl PortType {
    /// Whether two buffers of this type additively mix on fan-in, or take
    /// last-writer-wins (spec.md §4.3).
    pub fn mixes_additively(self) -> bool {
        matches!(self, PortType::Audio | PortType::Cv)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// One port on a block, with one buffer per polyphonic voice.
pub struct Port {
    pub ty: PortType,
    pub direction: PortDirection,
    pub index: u32,
    /// The port's own symbol, used to address it from a block's path (e.g.
    /// `/g/a/out`), distinct from the block's own symbol.
    pub symbol: Symbol,
    /// `true` once a client or block has written the port's value
    /// explicitly; reset by `DisconnectAll` (spec.md §4.7 "Disconnect").
    pub is_set: bool,
    /// The explicit value a control/cv port reverts to when its last edge
    /// is removed (spec.md §4.5: "control/cv ports [reset] to their stored
    /// value").
    pub stored_value: f32,
    voices: SmallVec<[Buffer; 1]>,
    /// Edges feeding this port, in declaration order (tie-break for event
    /// merge order, spec.md §4.3).
    incoming: Vec<Edge>,
}

impl Port {
    pub fn new(ty: PortType, direction: PortDirection, index: u32, symbol: Symbol, poly: usize, factory: &BufferFactory, capacity: usize) -> Self {
        let voices = (0..poly.max(1)).map(|_| factory.acquire(ty, capacity)).collect();
        Self {
            ty,
            direction,
            index,
            symbol,
            is_set: false,
            stored_value: 0.0,
            voices,
            incoming: Vec::new(),
        }
    }

    pub fn poly(&self) -> usize {
        self.voices.len()
    }
    pub fn voice(&self, i: usize) -> &Buffer {
        &self.voices[i.min(self.voices.len() - 1)]
    }
    pub fn voice_mut(&mut self, i: usize) -> &mut Buffer {
        let len = self.voices.len();
        &mut self.voices[i.min(len - 1)]
    }
    pub fn voices(&self) -> &[Buffer] {
        &self.voices
    }

    pub fn connect(&mut self, edge: Edge) {
        self.incoming.push(edge);
    }
    /// Removes the edge from `source`'s tail, returning `true` if the
    /// port's edge count dropped to zero as a result (the caller should
    /// then call [`Self::reset_to_stored_value`], spec.md §4.5).
    pub fn disconnect(&mut self, source: &Edge) -> bool {
        self.incoming.retain(|e| e.tail != source.tail || e.tail_port != source.tail_port);
        self.incoming.is_empty()
    }
    pub fn disconnect_all(&mut self) {
        self.incoming.clear();
        self.is_set = false;
    }
    pub fn incoming(&self) -> &[Edge] {
        &self.incoming
    }

    /// Resets this port's buffers to their quiescent value: the stored
    /// constant for control/cv, silence for audio, empty for sequences
    /// (spec.md §4.5).
    pub fn reset_to_stored_value(&mut self) {
        match self.ty {
            PortType::Control | PortType::Cv => {
                let v = self.stored_value;
                for voice in &mut self.voices {
                    voice.set_control_value(v);
                }
            }
            PortType::Audio | PortType::Sequence => {
                for voice in &mut self.voices {
                    voice.clear();
                }
            }
        }
    }

    /// Resizes the voice array for a new polyphony value, acquiring or
    /// dropping buffers as needed. Only called during `pre_process`.
    pub fn set_poly(&mut self, poly: usize, factory: &BufferFactory, capacity: usize) {
        let poly = poly.max(1);
        while self.voices.len() < poly {
            self.voices.push(factory.acquire(self.ty, capacity));
        }
        self.voices.truncate(poly);
    }

    /// Input-port fan-in: mixes every incoming edge's current source buffer
    /// for voice `voice_idx` into this port's own buffer (spec.md §4.3).
    pub fn mix_inputs(&mut self, voice_idx: usize, sources: &[&Buffer]) {
        let dst = self.voice_mut(voice_idx);
        dst.clear();
        match self.ty {
            PortType::Audio | PortType::Cv => {
                for src in sources {
                    dst.mix_add(src);
                }
            }
            PortType::Control => {
                if let Some(last) = sources.last() {
                    dst.copy_from(last, 0, 1);
                }
            }
            PortType::Sequence => {
                // Interleaved-timestamp merge; `sources` is already in
                // edge-declaration order so equal timestamps tie-break
                // stably.
                let mut merged: Vec<(u32, u32, Vec<u8>)> = Vec::new();
                for src in sources {
                    for ev in src.inner_events() {
                        merged.push((ev.frame, ev.ty, ev.body.clone()));
                    }
                }
                merged.sort_by_key(|(frame, ..)| *frame);
                for (frame, ty, body) in merged {
                    dst.append_event(frame, ty, &body);
                }
            }
        }
    }

    /// Output-port pre_process: clear for the block's `run` to fill
    /// (spec.md §4.3: "For output ports, pre_process is a clear").
    pub fn clear_output(&mut self) {
        for v in &mut self.voices {
            v.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_input_takes_last_writer() {
        let factory = BufferFactory::new();
        let mut port = Port::new(PortType::Control, PortDirection::Input, 0, Symbol::new("in").unwrap(), 1, &factory, 1);
        let mut a = factory.acquire(PortType::Control, 1);
        let mut b = factory.acquire(PortType::Control, 1);
        a.set_control_value(1.0);
        b.set_control_value(2.0);
        port.mix_inputs(0, &[&a, &b]);
        assert_eq!(port.voice(0).control_value(), 2.0);
    }

    #[test]
    fn audio_input_mixes_additively() {
        let factory = BufferFactory::new();
        let mut port = Port::new(PortType::Audio, PortDirection::Input, 0, Symbol::new("in").unwrap(), 1, &factory, 4);
        let mut a = factory.acquire(PortType::Audio, 4);
        let mut b = factory.acquire(PortType::Audio, 4);
        a.set_block(1.0, 0, 4);
        b.set_block(2.0, 0, 4);
        port.mix_inputs(0, &[&a, &b]);
        assert_eq!(port.voice(0).audio_samples(), &[3.0; 4]);
    }
}
