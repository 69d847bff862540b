//! `internal:Controller` — converts one MIDI continuous-controller stream
//! into a control-rate port value, the single-binding counterpart to the
//! graph-wide `ControlBindings` collaborator (spec.md §4.10), grounded on
//! `original_source`'s `internals/Controller.hpp` node (declared in
//! `InternalPlugin.cpp`, body not retained in the filtered pack).
//!
//! Ports: 0 MIDI sequence in, 1 control out.

use ingen_primitives::PortBuffer;

use crate::{BlockImpl, Status};

/// Status byte for a MIDI Control Change message, high nibble.
const CC_STATUS: u8 = 0xB0;

pub struct Controller {
    controller_number: u8,
    input: Option<PortBuffer>,
    output: Option<PortBuffer>,
    last_value: f32,
}
impl Controller {
    pub fn new(controller_number: u8) -> Self {
        Self {
            controller_number,
            input: None,
            output: None,
            last_value: 0.0,
        }
    }
}
impl BlockImpl for Controller {
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
    fn run(&mut self, _nframes: u32) {
        if let Some(mut input) = self.input {
            let seq = unsafe { input.sequence() };
            for event in seq.events() {
                if event.body.len() == 3
                    && (event.body[0] & 0xF0) == CC_STATUS
                    && event.body[1] == self.controller_number
                {
                    self.last_value = event.body[2] as f32 / 127.0;
                }
            }
        }
        if let Some(mut output) = self.output {
            unsafe { output.set_control(self.last_value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingen_primitives::SequenceBuffer;

    #[test]
    fn maps_matching_cc_to_control_value() {
        let mut node = Controller::new(7);
        node.activate(48000.0, 64).unwrap();

        let mut seq = SequenceBuffer::with_capacity(64);
        seq.append_event(0, 1, &[CC_STATUS, 7, 127]).unwrap();
        seq.append_event(10, 1, &[CC_STATUS, 1, 64]).unwrap();
        let mut control = 0.0f32;
        unsafe {
            node.connect_port(0, PortBuffer::Sequence(&mut seq));
            node.connect_port(1, PortBuffer::Control(&mut control));
        }
        node.run(64);
        assert_eq!(control, 1.0);
    }
}
