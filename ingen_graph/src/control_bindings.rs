//! ControlBindings, spec.md §4.8: a bidirectional `{(channel, controller) ↔
//! port-ref}` map with "learn" mode, consuming MIDI CC events into port
//! values during `pre_process`-for-cycle and emitting feedback CC events
//! during `post_process`-for-cycle.
//!
//! `knaster_graph` has nothing like this (no MIDI, no bidirectional control
//! map); grounded on the general shape of `ingen_core::internal_plugins::
//! Controller` (a single-binding version of the same CC-matching logic)
//! generalized to a registry of many bindings plus the inverse direction.

use std::collections::HashMap;

use ingen_primitives::Path;

const CC_STATUS: u8 = 0xB0;

/// The `RawEvent::ty` tag used for raw 3-byte MIDI messages on the root
/// control ports (spec.md §4.8). There's exactly one event format
/// `ControlBindings` understands today, so this is a fixed constant rather
/// than an interned URID looked up through `ingen_primitives`.
pub const MIDI_EVENT: u32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MidiCc {
    pub channel: u8,
    pub controller: u8,
}

/// One bound port, with the value range a CC's 0..127 maps onto.
#[derive(Clone, Debug)]
pub struct MidiBinding {
    pub port_path: Path,
    pub port_index: u32,
    pub min: f32,
    pub max: f32,
    /// If set, this binding's port is also read and fed back out as CC
    /// messages during `post_process`-for-cycle (spec.md §4.8).
    pub feedback: bool,
}
impl MidiBinding {
    fn to_control_value(&self, cc_value: u8) -> f32 {
        self.min + (self.max - self.min) * (cc_value as f32 / 127.0)
    }
    fn from_control_value(&self, value: f32) -> u8 {
        let t = ((value - self.min) / (self.max - self.min).max(f32::EPSILON)).clamp(0.0, 1.0);
        (t * 127.0).round() as u8
    }
}

/// A port write produced by consuming one CC event, handed to the caller to
/// apply against the live `Store` (this module has no `Store` access of its
/// own, matching spec.md §9's "no shared mutable ownership").
pub struct PortWrite {
    pub port_path: Path,
    pub port_index: u32,
    pub value: f32,
}

/// An outgoing CC event to emit on the root control output.
pub struct CcFeedback {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

pub struct ControlBindings {
    bindings: HashMap<MidiCc, MidiBinding>,
    /// The port waiting for the next CC while in "learn" mode, if any.
    pending_learn: Option<(Path, u32, f32, f32)>,
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self::new()
    }
}
impl ControlBindings {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            pending_learn: None,
        }
    }

    pub fn bind(&mut self, cc: MidiCc, binding: MidiBinding) {
        self.bindings.insert(cc, binding);
    }
    pub fn unbind(&mut self, cc: &MidiCc) -> Option<MidiBinding> {
        self.bindings.remove(cc)
    }
    pub fn binding_for(&self, cc: &MidiCc) -> Option<&MidiBinding> {
        self.bindings.get(cc)
    }

    /// Arms learn mode: the next CC event consumed binds to `port_path`.
    pub fn learn(&mut self, port_path: Path, port_index: u32, min: f32, max: f32) {
        self.pending_learn = Some((port_path, port_index, min, max));
    }

    /// Consumes raw MIDI bytes from the root control input, writing
    /// matching bindings' ports (spec.md §4.8: "for each matching CC,
    /// writes the mapped port's value").
    pub fn process_incoming(&mut self, midi_events: impl IntoIterator<Item = (u8, u8, u8)>) -> Vec<PortWrite> {
        let mut writes = Vec::new();
        for (status, controller, value) in midi_events {
            if status & 0xF0 != CC_STATUS {
                continue;
            }
            let channel = status & 0x0F;
            let cc = MidiCc { channel, controller };

            if let Some((path, index, min, max)) = self.pending_learn.take() {
                let binding = MidiBinding {
                    port_path: path.clone(),
                    port_index: index,
                    min,
                    max,
                    feedback: false,
                };
                writes.push(PortWrite {
                    port_path: path.clone(),
                    port_index: index,
                    value: binding.to_control_value(value),
                });
                self.bindings.insert(cc, binding);
                continue;
            }
            if let Some(binding) = self.bindings.get(&cc) {
                writes.push(PortWrite {
                    port_path: binding.port_path.clone(),
                    port_index: binding.port_index,
                    value: binding.to_control_value(value),
                });
            }
        }
        writes
    }

    /// Produces feedback CC messages for every `feedback`-flagged binding,
    /// given the current value of each bound port (spec.md §4.8:
    /// "post_process ... reads port values flagged feedback and emits CC
    /// events").
    pub fn process_feedback(&self, port_value: impl Fn(&Path, u32) -> Option<f32>) -> Vec<CcFeedback> {
        let mut out = Vec::new();
        for (cc, binding) in &self.bindings {
            if !binding.feedback {
                continue;
            }
            if let Some(value) = port_value(&binding.port_path, binding.port_index) {
                out.push(CcFeedback {
                    channel: cc.channel,
                    controller: cc.controller,
                    value: binding.from_control_value(value),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_cc_produces_a_port_write() {
        let mut bindings = ControlBindings::new();
        bindings.bind(
            MidiCc { channel: 0, controller: 7 },
            MidiBinding {
                port_path: Path::parse("/g/a/gain").unwrap(),
                port_index: 0,
                min: 0.0,
                max: 1.0,
                feedback: false,
            },
        );
        let writes = bindings.process_incoming([(CC_STATUS, 7, 127)]);
        assert_eq!(writes.len(), 1);
        assert!((writes[0].value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn learn_mode_binds_the_next_cc() {
        let mut bindings = ControlBindings::new();
        bindings.learn(Path::parse("/g/a/gain").unwrap(), 0, 0.0, 1.0);
        let writes = bindings.process_incoming([(CC_STATUS, 3, 64)]);
        assert_eq!(writes.len(), 1);
        assert!(bindings.binding_for(&MidiCc { channel: 0, controller: 3 }).is_some());
    }
}
