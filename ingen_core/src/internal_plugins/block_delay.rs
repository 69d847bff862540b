//! `internal:BlockDelay` — delays an audio signal by exactly one process
//! cycle, the feedback-loop primitive named in `original_source`'s
//! `internals/BlockDelay.hpp` (declared, body not retained in the filtered
//! source pack; this is a from-scratch implementation of the documented
//! behavior, not a translation).
//!
//! Ports: 0 audio in, 1 audio out.

use ingen_primitives::PortBuffer;

use crate::{BlockImpl, Status};

pub struct BlockDelay {
    input: Option<PortBuffer>,
    output: Option<PortBuffer>,
    /// The previous cycle's input, played back this cycle.
    held: Vec<f32>,
}
impl Default for BlockDelay {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            held: Vec::new(),
        }
    }
}
impl BlockImpl for BlockDelay {
    fn activate(&mut self, _sample_rate: f64, max_block_size: u32) -> Result<(), Status> {
        self.held = vec![0.0; max_block_size as usize];
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
        let Some(mut out) = self.output else { return };
        let out_slice = unsafe { out.audio_slice_mut() };
        out_slice[..nframes as usize].copy_from_slice(&self.held[..nframes as usize]);

        if let Some(input) = self.input {
            let in_slice = unsafe { input.audio_slice() };
            self.held[..nframes as usize].copy_from_slice(&in_slice[..nframes as usize]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_input_by_one_cycle() {
        let mut node = BlockDelay::default();
        node.activate(48000.0, 4).unwrap();

        let mut input = [1.0f32, 2.0, 3.0, 4.0];
        let mut output = [0.0f32; 4];
        unsafe {
            node.connect_port(
                0,
                PortBuffer::Audio {
                    ptr: input.as_mut_ptr(),
                    nframes: 4,
                },
            );
            node.connect_port(
                1,
                PortBuffer::Audio {
                    ptr: output.as_mut_ptr(),
                    nframes: 4,
                },
            );
        }
        node.run(4);
        assert_eq!(output, [0.0; 4]);

        input = [5.0, 6.0, 7.0, 8.0];
        node.run(4);
        assert_eq!(output, [1.0, 2.0, 3.0, 4.0]);
    }
}
