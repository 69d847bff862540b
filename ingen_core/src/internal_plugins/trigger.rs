//! `internal:Trigger` — turns MIDI note-on events into single-sample audio
//! pulses, grounded on `original_source`'s `internals/Trigger.hpp` node
//! (declared in `InternalPlugin.cpp`, body not retained in the filtered
//! pack).
//!
//! Ports: 0 MIDI sequence in, 1 audio out. Unlike [`crate::internal_plugins::Note`],
//! this ignores note number and emits a fixed-amplitude pulse at the exact
//! frame any Note-On lands on, suited to driving envelope/percussion
//! triggers rather than pitched voices.

use ingen_primitives::PortBuffer;

use crate::{BlockImpl, Status};

const NOTE_ON: u8 = 0x90;

pub struct Trigger {
    input: Option<PortBuffer>,
    output: Option<PortBuffer>,
}
impl Default for Trigger {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
        }
    }
}
impl BlockImpl for Trigger {
    fn activate(&mut self, _sample_rate: f64, _max_block_size: u32) -> Result<(), Status> {
        Ok(())
    }
    unsafe fn connect_port(&mut self, index: u32, buffer: PortBuffer) {
        match index {
            0 => self.input = Some(buffer),
            1 => self.output = Some(buffer),
            _ => {}
        }
    }
    fn run(&mut self, nframes: u32) {
        let Some(mut output) = self.output else { return };
        let out = unsafe { output.audio_slice_mut() };
        out[..nframes as usize].fill(0.0);

        if let Some(mut input) = self.input {
            let seq = unsafe { input.sequence() };
            for event in seq.events() {
                if event.body.len() == 3 && (event.body[0] & 0xF0) == NOTE_ON && event.body[2] > 0 {
                    let frame = (event.frame as usize).min(out.len().saturating_sub(1));
                    out[frame] = 1.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingen_primitives::SequenceBuffer;

    #[test]
    fn note_on_emits_a_single_sample_pulse() {
        let mut node = Trigger::default();
        node.activate(48000.0, 8).unwrap();

        let mut seq = SequenceBuffer::with_capacity(64);
        seq.append_event(3, 1, &[NOTE_ON, 60, 100]).unwrap();
        let mut out = [0.0f32; 8];
        unsafe {
            node.connect_port(0, PortBuffer::Sequence(&mut seq));
            node.connect_port(
                1,
                PortBuffer::Audio {
                    ptr: out.as_mut_ptr(),
                    nframes: 8,
                },
            );
        }
        node.run(8);
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }
}
