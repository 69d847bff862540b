//! `internal:Time` — exposes the engine's running position as a control
//! output, grounded on `original_source`'s `internals/Time.hpp` node
//! (declared in `InternalPlugin.cpp`, body not retained in the filtered
//! pack).
//!
//! Ports: 0 elapsed-seconds control out. Transport tempo/bar position is out
//! of scope (spec.md's graph engine core doesn't model a transport), so this
//! exposes wall time since `activate` rather than a musical position.

use ingen_primitives::PortBuffer;

use crate::{BlockImpl, Status};

pub struct Time {
    sample_rate: f64,
    frames_elapsed: u64,
    output: Option<PortBuffer>,
}
impl Default for Time {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            frames_elapsed: 0,
            output: None,
        }
    }
}
impl BlockImpl for Time {
    fn activate(&mut self, sample_rate: f64, _max_block_size: u32) -> Result<(), Status> {
        self.sample_rate = sample_rate;
        self.frames_elapsed = 0;
        Ok(())
    }
    unsafe fn connect_port(&mut self, index: u32, buffer: PortBuffer) {
        if index == 0 {
            self.output = Some(buffer);
        }
    }
    fn run(&mut self, nframes: u32) {
        if let Some(mut output) = self.output {
            let seconds = self.frames_elapsed as f64 / self.sample_rate;
            unsafe { output.set_control(seconds as f32) };
        }
        self.frames_elapsed += nframes as u64;
    }
}
