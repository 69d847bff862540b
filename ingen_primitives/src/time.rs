//! Frame-accurate time, used for event timestamps (`_time` in spec.md §4.6)
//! and for `ControlBindings` scheduling windows.
//!
//! Grounded on `knaster_primitives::time::Seconds`: a fixed-point
//! seconds+tesimals representation that round-trips losslessly between any
//! two common sample rates, which plain `f64` seconds cannot guarantee.

use core::ops;

/// How many subsecond tesimals fit in one second.
pub const SUBSECOND_TESIMALS_PER_SECOND: u32 = 282_240_000;

/// A lossless, sample-rate-independent point in time.
///
/// Can represent up to `u32::MAX` seconds (~136 years) with sub-sample
/// accuracy, and converts to/from a sample count at any sample rate without
/// rounding drift across repeated conversions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Seconds {
    seconds: u32,
    subsecond_tesimals: u32,
}
impl Seconds {
    pub const ZERO: Self = Self {
        seconds: 0,
        subsecond_tesimals: 0,
    };
    pub const MAX: Self = Self {
        seconds: u32::MAX,
        subsecond_tesimals: u32::MAX,
    };

    pub fn new(seconds: u32, subsecond_tesimals: u32) -> Self {
        Self {
            seconds,
            subsecond_tesimals,
        }
    }

    pub fn from_secs_f64(seconds_f64: f64) -> Self {
        let seconds = seconds_f64.floor() as u32;
        let subsecond_tesimals =
            (seconds_f64.fract() * SUBSECOND_TESIMALS_PER_SECOND as f64) as u32;
        Self::new(seconds, subsecond_tesimals)
    }
    pub fn to_secs_f64(&self) -> f64 {
        self.seconds as f64
            + (self.subsecond_tesimals as f64 / SUBSECOND_TESIMALS_PER_SECOND as f64)
    }
    /// Convert a sample count at `sample_rate` into a `Seconds`.
    pub fn from_samples(samples: u64, sample_rate: u64) -> Self {
        let seconds = (samples / sample_rate) as u32;
        let subsecond_tesimals =
            ((samples % sample_rate) * SUBSECOND_TESIMALS_PER_SECOND as u64 / sample_rate) as u32;
        Self {
            seconds,
            subsecond_tesimals,
        }
    }
    /// Convert to a sample count at `sample_rate`, truncating.
    pub fn to_samples(&self, sample_rate: u64) -> u64 {
        self.seconds as u64 * sample_rate
            + ((self.subsecond_tesimals as u64 * sample_rate)
                / SUBSECOND_TESIMALS_PER_SECOND as u64)
    }
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if self <= rhs {
            Self::ZERO
        } else if self.subsecond_tesimals >= rhs.subsecond_tesimals {
            Self::new(
                self.seconds - rhs.seconds,
                self.subsecond_tesimals - rhs.subsecond_tesimals,
            )
        } else {
            Self::new(
                self.seconds - rhs.seconds - 1,
                SUBSECOND_TESIMALS_PER_SECOND - (rhs.subsecond_tesimals - self.subsecond_tesimals),
            )
        }
    }
}
impl ops::Add for Seconds {
    type Output = Seconds;
    fn add(self, rhs: Self) -> Self::Output {
        let mut subsecond_tesimals = self.subsecond_tesimals + rhs.subsecond_tesimals;
        let mut seconds = self.seconds + rhs.seconds;
        if subsecond_tesimals >= SUBSECOND_TESIMALS_PER_SECOND {
            subsecond_tesimals -= SUBSECOND_TESIMALS_PER_SECOND;
            seconds += 1;
        }
        Seconds::new(seconds, subsecond_tesimals)
    }
}

/// A frame-accurate audio-cycle window: `[start, start + nframes)`, the
/// `ProcessContext`/`RunContext` of spec.md §4.12/§6.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub start: u64,
    pub nframes: u32,
}
impl Cycle {
    pub fn new(start: u64, nframes: u32) -> Self {
        Self { start, nframes }
    }
    pub fn end(&self) -> u64 {
        self.start + self.nframes as u64
    }
    /// True if the frame-accurate timestamp `time` falls within this cycle.
    pub fn contains(&self, time: u64) -> bool {
        time >= self.start && time < self.end()
    }
    /// Offset of an absolute timestamp from the start of this cycle, clamped
    /// to the cycle's length. Used by event `execute` to splice sequence
    /// events at the correct frame.
    pub fn offset_of(&self, time: u64) -> u32 {
        time.saturating_sub(self.start).min(self.nframes as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_round_trip_at_common_rates() {
        for rate in [44_100u64, 48_000, 96_000] {
            for samples in [0u64, 1, 63, 64, 1_000_000] {
                let s = Seconds::from_samples(samples, rate);
                assert_eq!(s.to_samples(rate), samples);
            }
        }
    }

    #[test]
    fn cycle_contains_and_offset() {
        let cycle = Cycle::new(128, 64);
        assert!(cycle.contains(128));
        assert!(cycle.contains(191));
        assert!(!cycle.contains(192));
        assert_eq!(cycle.offset_of(128), 0);
        assert_eq!(cycle.offset_of(150), 22);
        assert_eq!(cycle.offset_of(10_000), 64);
    }
}
