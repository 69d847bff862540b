//! `internal:Note` — converts a monophonic MIDI note stream into
//! frequency/gate/velocity control outputs, grounded on `original_source`'s
//! `internals/Note.hpp` node (declared in `InternalPlugin.cpp`, body not
//! retained in the filtered pack).
//!
//! Ports: 0 MIDI sequence in, 1 freq-Hz control out, 2 gate control out
//! (0.0/1.0), 3 velocity control out (0.0-1.0).
//!
//! Last-note-priority monophonic behavior: a Note-On always takes over the
//! output; a Note-Off only releases the gate if it matches the
//! currently-held note.

use ingen_primitives::PortBuffer;

use crate::{BlockImpl, Status};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

fn midi_note_to_hz(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

pub struct Note {
    input: Option<PortBuffer>,
    freq: Option<PortBuffer>,
    gate: Option<PortBuffer>,
    velocity: Option<PortBuffer>,
    held_note: Option<u8>,
}
impl Default for Note {
    fn default() -> Self {
        Self {
            input: None,
            freq: None,
            gate: None,
            velocity: None,
            held_note: None,
        }
    }
}
impl BlockImpl for Note {
    fn activate(&mut self, _sample_rate: f64, _max_block_size: u32) -> Result<(), Status> {
        Ok(())
    }
    unsafe fn connect_port(&mut self, index: u32, buffer: PortBuffer) {
        match index {
            0 => self.input = Some(buffer),
            1 => self.freq = Some(buffer),
            2 => self.gate = Some(buffer),
            3 => self.velocity = Some(buffer),
            _ => {}
        }
    }
    fn run(&mut self, _nframes: u32) {
        let mut gate_value = self.held_note.is_some() as u8 as f32;
        let mut velocity_value = None;
        let mut freq_value = None;

        if let Some(mut input) = self.input {
            let seq = unsafe { input.sequence() };
            for event in seq.events() {
                if event.body.len() != 3 {
                    continue;
                }
                let status = event.body[0] & 0xF0;
                let note = event.body[1];
                let velocity = event.body[2];
                if status == NOTE_ON && velocity > 0 {
                    self.held_note = Some(note);
                    freq_value = Some(midi_note_to_hz(note));
                    velocity_value = Some(velocity as f32 / 127.0);
                    gate_value = 1.0;
                } else if status == NOTE_OFF || (status == NOTE_ON && velocity == 0) {
                    if self.held_note == Some(note) {
                        self.held_note = None;
                        gate_value = 0.0;
                    }
                }
            }
        }
        if let (Some(mut freq), Some(value)) = (self.freq, freq_value) {
            unsafe { freq.set_control(value) };
        }
        if let (Some(mut vel), Some(value)) = (self.velocity, velocity_value) {
            unsafe { vel.set_control(value) };
        }
        if let Some(mut gate) = self.gate {
            unsafe { gate.set_control(gate_value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingen_primitives::SequenceBuffer;

    #[test]
    fn note_on_then_off_drives_gate() {
        let mut node = Note::default();
        node.activate(48000.0, 64).unwrap();

        let (mut freq, mut gate, mut velocity) = (0.0f32, 0.0f32, 0.0f32);
        let mut seq = SequenceBuffer::with_capacity(64);
        seq.append_event(0, 1, &[NOTE_ON, 69, 100]).unwrap();
        unsafe {
            node.connect_port(0, PortBuffer::Sequence(&mut seq));
            node.connect_port(1, PortBuffer::Control(&mut freq));
            node.connect_port(2, PortBuffer::Control(&mut gate));
            node.connect_port(3, PortBuffer::Control(&mut velocity));
        }
        node.run(64);
        assert_eq!(freq, 440.0);
        assert_eq!(gate, 1.0);
        assert!((velocity - 100.0 / 127.0).abs() < 1e-6);

        seq.clear();
        seq.append_event(0, 1, &[NOTE_OFF, 69, 0]).unwrap();
        node.run(64);
        assert_eq!(gate, 0.0);
    }
}
