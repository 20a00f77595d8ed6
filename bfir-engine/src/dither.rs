//! Triangular-PDF dither with high-pass error feedback
//!
//! A table of pseudo-random bytes is generated once at construction and
//! shared read-only by every channel. Each channel walks its own window of
//! the table; the difference of two consecutive bytes gives a triangular
//! distribution, mapped to an offset through a 512-entry lookup.

use crate::error::EngineError;
use crate::real::Real;

/// Seconds of random data reserved per channel
const SPACING_SECONDS: usize = 10;
/// Minimum seconds of random data per channel
const MIN_SPACING_SECONDS: usize = 1;
/// Entries in the offset map, covering differences -256..=255
const MAP_SIZE: usize = 512;

/// Combined Tausworthe generator (three LFSR components)
#[derive(Debug, Clone)]
pub struct Tausworthe {
    s1: u32,
    s2: u32,
    s3: u32,
}

impl Tausworthe {
    pub fn new(seed: u32) -> Self {
        let seed = if seed == 0 { 1 } else { seed };
        let lcg = |n: u32| n.wrapping_mul(69069);
        let s1 = lcg(seed);
        let s2 = lcg(s1);
        let s3 = lcg(s2);
        let mut rng = Self { s1, s2, s3 };
        for _ in 0..6 {
            rng.next_u32();
        }
        rng
    }

    #[inline(always)]
    pub fn next_u32(&mut self) -> u32 {
        self.s1 = ((self.s1 & 4294967294) << 12) ^ (((self.s1 << 13) ^ self.s1) >> 19);
        self.s2 = ((self.s2 & 4294967288) << 4) ^ (((self.s2 << 2) ^ self.s2) >> 25);
        self.s3 = ((self.s3 & 4294967280) << 17) ^ (((self.s3 << 3) ^ self.s3) >> 11);
        self.s1 ^ self.s2 ^ self.s3
    }
}

/// Per-channel walk through the shared table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DitherState<T> {
    /// Start of the next block's window
    cursor: usize,
    /// Start of the current block's window
    window: usize,
    /// Table byte preceding the current window
    previous: i8,
    /// Error feedback accumulators
    pub(crate) feedback: [T; 2],
    initial_cursor: usize,
}

impl<T: Real> DitherState<T> {
    pub fn reset(&mut self) {
        self.cursor = self.initial_cursor;
        self.window = self.initial_cursor;
        self.previous = 0;
        self.feedback = [T::ZERO; 2];
    }
}

/// Shared random table and offset map
#[derive(Debug, Clone)]
pub struct DitherTable<T> {
    randtab: Vec<i8>,
    randmap: Vec<T>,
    spacing: usize,
}

impl<T: Real> DitherTable<T> {
    /// Per-channel spacing, or an error when `max_size` cannot hold the minimum.
    ///
    /// `max_size` of 0 means unlimited.
    pub fn spacing_for(
        channels: usize,
        sample_rate: u32,
        block_length: usize,
        max_size: usize,
    ) -> Result<usize, EngineError> {
        let rate = sample_rate as usize;
        let min_spacing = (MIN_SPACING_SECONDS * rate).max(block_length);
        let mut spacing = (SPACING_SECONDS * rate).max(min_spacing);
        if max_size > 0 && channels * spacing > max_size {
            spacing = max_size / channels;
            if spacing < min_spacing {
                return Err(EngineError::DitherTableTooSmall {
                    max_size,
                    channels,
                    required: channels * min_spacing + 1,
                });
            }
        }
        Ok(spacing)
    }

    pub fn new(
        channels: usize,
        sample_rate: u32,
        block_length: usize,
        max_size: usize,
    ) -> Result<Self, EngineError> {
        let spacing = Self::spacing_for(channels, sample_rate, block_length, max_size)?;
        let size = channels * spacing + 1;

        let mut rng = Tausworthe::new(1);
        let randtab: Vec<i8> = (0..size).map(|_| (rng.next_u32() & 0xFF) as u8 as i8).collect();

        let mut randmap = vec![T::ZERO; MAP_SIZE];
        for (i, entry) in randmap.iter_mut().enumerate() {
            let diff = i as i32 - 256;
            *entry = match diff {
                -256 => T::of(-0.5),
                n if n >= 254 => T::of(1.5),
                n => T::of(0.5 + 1.0 / 255.0 + n as f64 / 255.0),
            };
        }

        Ok(Self {
            randtab,
            randmap,
            spacing,
        })
    }

    /// Table length in bytes
    pub fn len(&self) -> usize {
        self.randtab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.randtab.is_empty()
    }

    pub fn spacing(&self) -> usize {
        self.spacing
    }

    /// Fresh state for `channel`
    pub fn state(&self, channel: usize) -> DitherState<T> {
        let start = channel * self.spacing + 1;
        DitherState {
            cursor: start,
            window: start,
            previous: 0,
            feedback: [T::ZERO; 2],
            initial_cursor: start,
        }
    }

    /// Claim a window of `samples` bytes for the next block
    pub fn begin_block(&self, state: &mut DitherState<T>, samples: usize) {
        state.previous = self.randtab[state.cursor - 1];
        if state.cursor + samples >= self.randtab.len() {
            state.cursor = 1;
        }
        state.window = state.cursor;
        state.cursor += samples;
    }

    /// Dither offset for sample `k` of the current window
    #[inline(always)]
    pub fn offset(&self, state: &DitherState<T>, k: usize) -> T {
        let current = self.randtab[state.window + k] as i32;
        let previous = if k == 0 {
            state.previous as i32
        } else {
            self.randtab[state.window + k - 1] as i32
        };
        self.randmap[(current - previous + 256) as usize]
    }
}
