//! Partitioned overlap-save convolution engine
//!
//! One call to `run` consumes one block of `filter_length` interleaved frames
//! per channel and produces the matching filtered block. Each channel keeps a
//! ring of the last `n_blocks` input spectra; coefficient block `i` is
//! multiplied against the spectrum of the input block `i` calls in the past.

use std::path::PathBuf;

use crate::codec;
use crate::coeff::{self, CoeffSet};
use crate::dither::{DitherState, DitherTable};
use crate::error::{CoeffError, EngineError, RunError};
use crate::format::{BufferLayout, SampleSpec};
use crate::log::{default_sink, SharedSink};
use crate::overflow::{Overflow, OverflowReport, OverflowTracker};
use crate::real::{Precision, Real};
use crate::transform::{self, MixMode, Transform};

/// Hard limit on the number of channels
pub const MAX_CHANNELS: usize = 8;

/// Everything needed to construct a filter
#[derive(Clone)]
pub struct FilterConfig {
    /// Samples per channel consumed by each `run` call (power of two)
    pub filter_length: usize,
    /// Partitions held in the input ring
    pub n_blocks: usize,
    pub precision: Precision,
    pub channels: usize,
    pub input: SampleSpec,
    pub output: SampleSpec,
    pub sample_rate: u32,
    /// Dither integer outputs
    pub dither: bool,
    /// Cap on the dither table in bytes, 0 for no cap
    pub max_dither_table_size: usize,
    /// Directory for FFT wisdom files
    pub wisdom_dir: Option<PathBuf>,
    pub sink: SharedSink,
}

impl FilterConfig {
    pub fn new(
        filter_length: usize,
        n_blocks: usize,
        channels: usize,
        input: impl Into<SampleSpec>,
        output: impl Into<SampleSpec>,
        sample_rate: u32,
    ) -> Self {
        Self {
            filter_length,
            n_blocks,
            precision: Precision::Single,
            channels,
            input: input.into(),
            output: output.into(),
            sample_rate,
            dither: false,
            max_dither_table_size: 0,
            wisdom_dir: None,
            sink: default_sink(),
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_dither(mut self, dither: bool) -> Self {
        self.dither = dither;
        self
    }

    pub fn with_max_dither_table_size(mut self, bytes: usize) -> Self {
        self.max_dither_table_size = bytes;
        self
    }

    pub fn with_wisdom_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wisdom_dir = Some(dir.into());
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Bytes per interleaved input block
    pub fn input_block_bytes(&self) -> usize {
        self.filter_length * self.channels * self.input.bytes
    }

    /// Bytes per interleaved output block
    pub fn output_block_bytes(&self) -> usize {
        self.filter_length * self.channels * self.output.bytes
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(EngineError::InvalidChannelCount {
                channels: self.channels,
                max: MAX_CHANNELS,
            });
        }
        if self.n_blocks == 0 {
            return Err(EngineError::InvalidBlockCount(self.n_blocks));
        }
        if !self.filter_length.is_power_of_two() || self.filter_length < transform::MIN_BLOCK_LENGTH
        {
            return Err(EngineError::InvalidBlockLength(self.filter_length));
        }
        self.input.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Decoded, deinterleaved coefficient data plus its origin
pub struct CoeffData {
    /// One buffer per channel
    pub channels: Vec<Vec<f64>>,
    pub sample_rate: u32,
}

/// Anything that can provide impulse responses to a filter
pub trait CoefficientSource {
    /// Human-readable origin for log messages
    fn describe(&self) -> String;
    /// Channel count and sample rate, without loading the data
    fn probe(&self) -> Result<(usize, u32), CoeffError>;
    /// Load at most `max_frames` frames per channel
    fn load(&self, max_frames: usize) -> Result<CoeffData, CoeffError>;
}

/// Filter for one channel: partitions or unity pass-through
#[derive(Debug, Clone)]
enum ChannelFilter<T> {
    Dirac,
    Blocks(CoeffSet<T>),
}

/// Offsets of one channel's regions inside the arena
#[derive(Debug, Clone, Copy)]
struct ArenaLayout {
    size: usize,
    ring_slots: usize,
    accum: usize,
    per_channel: usize,
}

impl ArenaLayout {
    fn new(size: usize, n_blocks: usize) -> Self {
        // With a single partition the lone ring slot doubles as accumulator
        let accum = if n_blocks > 1 { size } else { 0 };
        Self {
            size,
            ring_slots: n_blocks,
            accum,
            per_channel: n_blocks * size + accum + 4 * size,
        }
    }
}

/// Mutable views of one channel's regions
struct ChannelRegions<'a, T> {
    ring: &'a mut [T],
    accum: &'a mut [T],
    time: [&'a mut [T]; 2],
    freq_in: &'a mut [T],
    freq_out: &'a mut [T],
}

impl<'a, T> ChannelRegions<'a, T> {
    fn split(chunk: &'a mut [T], layout: &ArenaLayout) -> Self {
        let size = layout.size;
        let (ring, rest) = chunk.split_at_mut(layout.ring_slots * size);
        let (accum, rest) = rest.split_at_mut(layout.accum);
        let (time0, rest) = rest.split_at_mut(size);
        let (time1, rest) = rest.split_at_mut(size);
        let (freq_in, freq_out) = rest.split_at_mut(size);
        Self {
            ring,
            accum,
            time: [time0, time1],
            freq_in,
            freq_out,
        }
    }
}

/// Per-channel I/O description
#[derive(Debug, Clone, Copy)]
struct ChannelConfig {
    input: BufferLayout,
    output: BufferLayout,
    input_scale: f64,
    output_scale: f64,
    dither: bool,
}

/// The partitioned convolution state machine at one precision
pub struct Engine<T: Real> {
    filter_length: usize,
    n_blocks: usize,
    sample_rate: u32,
    channels: Vec<ChannelConfig>,
    transform: Transform<T>,
    dither: Option<DitherTable<T>>,
    dither_states: Vec<DitherState<T>>,
    /// Every buffer `run` touches, carved per channel plus one shared scratch
    arena: Vec<T>,
    layout: ArenaLayout,
    coeffs: Option<Vec<ChannelFilter<T>>>,
    procblocks: Vec<usize>,
    curbuf: usize,
    blockcounter: u64,
    overflow: OverflowTracker,
    sink: SharedSink,
}

impl<T: Real> Engine<T> {
    pub fn new(config: &FilterConfig) -> Result<Self, EngineError> {
        config.validate()?;
        if config.precision != T::PRECISION {
            return Err(EngineError::InvalidPrecision(config.precision.realsize()));
        }

        let n = config.channels;
        let channels: Vec<ChannelConfig> = (0..n)
            .map(|ch| ChannelConfig {
                input: BufferLayout::interleaved(config.input, ch, n),
                output: BufferLayout::interleaved(config.output, ch, n),
                input_scale: config.input.normalized_scale(),
                output_scale: config.output.full_scale(),
                dither: config.dither && !config.output.is_float,
            })
            .collect();

        // Size is checked even when no channel dithers
        DitherTable::<T>::spacing_for(
            n,
            config.sample_rate,
            config.filter_length,
            config.max_dither_table_size,
        )?;
        let dither = if channels.iter().any(|c| c.dither) {
            Some(DitherTable::new(
                n,
                config.sample_rate,
                config.filter_length,
                config.max_dither_table_size,
            )?)
        } else {
            None
        };
        let dither_states = match &dither {
            Some(table) => (0..n).map(|ch| table.state(ch)).collect(),
            None => Vec::new(),
        };

        let transform = Transform::with_wisdom(
            config.filter_length,
            config.sink.clone(),
            config.wisdom_dir.as_deref(),
        )?;

        let layout = ArenaLayout::new(transform.size(), config.n_blocks);
        let arena = vec![T::ZERO; n * layout.per_channel + layout.size];
        let max_values: Vec<f64> = vec![config.output.max_value(); n];

        Ok(Self {
            filter_length: config.filter_length,
            n_blocks: config.n_blocks,
            sample_rate: config.sample_rate,
            channels,
            transform,
            dither,
            dither_states,
            arena,
            layout,
            coeffs: None,
            procblocks: vec![0; n],
            curbuf: 0,
            blockcounter: 0,
            overflow: OverflowTracker::new(&max_values),
            sink: config.sink.clone(),
        })
    }

    pub fn filter_length(&self) -> usize {
        self.filter_length
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// True once a coefficient set has been assigned
    pub fn is_initialized(&self) -> bool {
        self.coeffs.is_some()
    }

    pub fn transform(&mut self) -> &mut Transform<T> {
        &mut self.transform
    }

    pub fn overflows(&self) -> &[Overflow] {
        self.overflow.records()
    }

    /// Replace the coefficient set from per-channel time-domain buffers.
    ///
    /// Channels beyond `coeffs.len()` pass audio through unchanged. On error
    /// the previous set stays in place.
    pub fn set_coeff<C: AsRef<[T]>>(
        &mut self,
        coeffs: &[C],
        coeff_blocks: usize,
        scale: f64,
    ) -> Result<(), CoeffError> {
        if coeff_blocks == 0 || coeff_blocks > self.n_blocks {
            return Err(CoeffError::InvalidBlockCount {
                blocks: coeff_blocks,
                max: self.n_blocks,
            });
        }

        let assigned = coeffs.len().min(self.channels.len());
        let mut filters = Vec::with_capacity(self.channels.len());
        for (channel, raw) in coeffs.iter().take(assigned).enumerate() {
            let set = coeff::preprocess(
                &mut self.transform,
                raw.as_ref(),
                self.filter_length,
                coeff_blocks,
                scale,
                channel,
            )?;
            filters.push(ChannelFilter::Blocks(set));
        }
        filters.resize(self.channels.len(), ChannelFilter::Dirac);

        self.coeffs = Some(filters);
        Ok(())
    }

    /// Drop the coefficient set, returning to the un-ready state
    pub fn clear_coeff(&mut self) {
        self.coeffs = None;
    }

    /// Process one block of interleaved frames
    pub fn run(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), RunError> {
        let filters = self.coeffs.as_ref().ok_or(RunError::NotReady)?;

        let samples = self.filter_length;
        let n_channels = self.channels.len();
        check_size("input", input.len(), samples * n_channels * self.channels[0].input.spec.bytes)?;
        check_size("output", output.len(), samples * n_channels * self.channels[0].output.spec.bytes)?;

        let size = self.layout.size;
        let n_blocks = self.n_blocks;
        let curbuf = self.curbuf;
        let blockcounter = self.blockcounter;
        let curblock = (blockcounter % n_blocks as u64) as usize;

        let (channel_area, scratch) = self.arena.split_at_mut(n_channels * self.layout.per_channel);

        for (n, chunk) in channel_area
            .chunks_exact_mut(self.layout.per_channel)
            .enumerate()
        {
            let config = &self.channels[n];
            let regions = ChannelRegions::split(chunk, &self.layout);
            let [time0, time1] = regions.time;
            let (cur, next) = if curbuf == 0 {
                (time0, time1)
            } else {
                (time1, time0)
            };

            // New samples go to the front of `next` and the back of `cur`,
            // so `cur` holds the previous block followed by this one
            codec::decode(input, &config.input, &mut next[..samples]);
            cur[samples..].copy_from_slice(&next[..samples]);

            self.transform.time_to_freq(cur, regions.freq_in);

            if self.procblocks[n] < n_blocks {
                self.procblocks[n] += 1;
            }

            let ring = regions.ring;
            let slot = curblock * size;
            transform::mix_and_scale(
                &[&*regions.freq_in],
                &mut ring[slot..slot + size],
                &[config.input_scale],
                MixMode::Input,
            );

            let spectrum: &[T] = match &filters[n] {
                ChannelFilter::Dirac if n_blocks == 1 => {
                    transform::dirac_convolve_inplace(&mut ring[..size]);
                    &ring[..size]
                }
                ChannelFilter::Dirac => {
                    let accum = regions.accum;
                    transform::dirac_convolve(&ring[slot..slot + size], accum);
                    accum
                }
                ChannelFilter::Blocks(set) if n_blocks == 1 => {
                    transform::convolve_inplace(&mut ring[..size], set.block(0));
                    &ring[..size]
                }
                ChannelFilter::Blocks(set) => {
                    let accum = regions.accum;
                    transform::convolve(&ring[slot..slot + size], set.block(0), accum);
                    // Only blocks that have actually been seen contribute
                    let history = set.len().min(self.procblocks[n]);
                    for i in 1..history {
                        let past = ((blockcounter + n_blocks as u64 - i as u64)
                            % n_blocks as u64) as usize
                            * size;
                        transform::convolve_add(&ring[past..past + size], set.block(i), accum);
                    }
                    accum
                }
            };

            transform::mix_and_scale(
                &[spectrum],
                regions.freq_out,
                &[config.output_scale],
                MixMode::Output,
            );
            self.transform.freq_to_time(regions.freq_out, scratch);

            // One sample per channel and block is enough to catch runaway values
            if !scratch[0].finite() {
                self.sink
                    .log("NaN or Inf values in the system! Invalid input? Aborting.");
                return Err(RunError::NonFinite { channel: n });
            }

            let overflow = self.overflow.record_mut(n);
            match (&self.dither, config.dither) {
                (Some(table), true) => codec::encode_dithered(
                    &scratch[..samples],
                    output,
                    &config.output,
                    overflow,
                    table,
                    &mut self.dither_states[n],
                ),
                _ => codec::encode(&scratch[..samples], output, &config.output, overflow),
            }
        }

        self.curbuf = 1 - curbuf;
        self.blockcounter = blockcounter + 1;
        Ok(())
    }

    /// Forget stream history and overflow statistics, keep coefficients
    pub fn reset(&mut self) {
        self.overflow.reset();
        self.procblocks.iter_mut().for_each(|p| *p = 0);
        self.curbuf = 0;
        self.blockcounter = 0;
        self.arena.iter_mut().for_each(|v| *v = T::ZERO);
        self.dither_states.iter_mut().for_each(|s| s.reset());
    }

    /// Report overflow statistics if they changed since the last report
    pub fn check_overflows(&mut self) -> Option<OverflowReport> {
        let report = self.overflow.check()?;
        self.sink.log(&report.to_string());
        Some(report)
    }
}

fn check_size(which: &'static str, actual: usize, expected: usize) -> Result<(), RunError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RunError::BufferSize {
            which,
            expected,
            actual,
        })
    }
}

/// A filter whose precision is chosen at runtime
pub enum FirFilter {
    Single(Engine<f32>),
    Double(Engine<f64>),
}

macro_rules! dispatch {
    ($self:expr, $engine:ident => $body:expr) => {
        match $self {
            FirFilter::Single($engine) => $body,
            FirFilter::Double($engine) => $body,
        }
    };
}

impl FirFilter {
    pub fn new(config: &FilterConfig) -> Result<Self, EngineError> {
        let filter = match config.precision {
            Precision::Single => FirFilter::Single(Engine::new(config)?),
            Precision::Double => FirFilter::Double(Engine::new(config)?),
        };
        config.sink.log(&format!(
            "Filter ready: {} channels, {} x {} taps, {}-bit reals",
            config.channels,
            config.n_blocks,
            config.filter_length,
            config.precision.realsize() * 8
        ));
        Ok(filter)
    }

    pub fn precision(&self) -> Precision {
        match self {
            FirFilter::Single(_) => Precision::Single,
            FirFilter::Double(_) => Precision::Double,
        }
    }

    pub fn filter_length(&self) -> usize {
        dispatch!(self, e => e.filter_length())
    }

    pub fn n_blocks(&self) -> usize {
        dispatch!(self, e => e.n_blocks())
    }

    pub fn channels(&self) -> usize {
        dispatch!(self, e => e.channels())
    }

    pub fn sample_rate(&self) -> u32 {
        dispatch!(self, e => e.sample_rate())
    }

    pub fn is_initialized(&self) -> bool {
        dispatch!(self, e => e.is_initialized())
    }

    pub fn overflows(&self) -> &[Overflow] {
        dispatch!(self, e => e.overflows())
    }

    /// Assign coefficients from caller-supplied per-channel buffers
    pub fn set_coeff<C: AsRef<[f64]>>(
        &mut self,
        coeffs: &[C],
        coeff_blocks: usize,
        scale: f64,
    ) -> Result<(), CoeffError> {
        match self {
            FirFilter::Single(e) => {
                let narrowed: Vec<Vec<f32>> = coeffs
                    .iter()
                    .map(|c| c.as_ref().iter().map(|&v| v as f32).collect())
                    .collect();
                e.set_coeff(&narrowed, coeff_blocks, scale)
            }
            FirFilter::Double(e) => e.set_coeff(coeffs, coeff_blocks, scale),
        }
    }

    /// Assign coefficients from a source whose channel count and sample rate
    /// must match the filter. Returns the number of channels assigned.
    pub fn set_coeff_from(
        &mut self,
        source: &dyn CoefficientSource,
        coeff_blocks: usize,
        scale: f64,
    ) -> Result<usize, CoeffError> {
        let (channels, sample_rate) = source.probe()?;
        if channels != self.channels() || sample_rate != self.sample_rate() {
            return Err(CoeffError::Incompatible(format!(
                "{} has {} channels at {} Hz, filter expects {} channels at {} Hz",
                source.describe(),
                channels,
                sample_rate,
                self.channels(),
                self.sample_rate()
            )));
        }

        let data = source.load(coeff_blocks * self.filter_length())?;
        let assigned = data.channels.len().min(self.channels());
        self.set_coeff(&data.channels[..assigned], coeff_blocks, scale)?;
        Ok(assigned)
    }

    pub fn clear_coeff(&mut self) {
        dispatch!(self, e => e.clear_coeff())
    }

    pub fn run(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), RunError> {
        dispatch!(self, e => e.run(input, output))
    }

    pub fn reset(&mut self) {
        dispatch!(self, e => e.reset())
    }

    pub fn check_overflows(&mut self) -> Option<OverflowReport> {
        dispatch!(self, e => e.check_overflows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use crate::log::BufferedSink;
    use std::sync::Arc;

    fn float_config(filter_length: usize, n_blocks: usize, channels: usize) -> FilterConfig {
        FilterConfig::new(
            filter_length,
            n_blocks,
            channels,
            SampleFormat::F32Le,
            SampleFormat::F32Le,
            48000,
        )
        .with_sink(Arc::new(BufferedSink::new()))
    }

    fn double_config(filter_length: usize, n_blocks: usize) -> FilterConfig {
        FilterConfig::new(
            filter_length,
            n_blocks,
            1,
            SampleFormat::F64Le,
            SampleFormat::F64Le,
            48000,
        )
        .with_precision(Precision::Double)
        .with_sink(Arc::new(BufferedSink::new()))
    }

    fn run_f32(engine: &mut Engine<f32>, input: &[f32]) -> Vec<f32> {
        let raw: Vec<u8> = input.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut out = vec![0u8; raw.len()];
        engine.run(&raw, &mut out).unwrap();
        out.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn run_f64(engine: &mut Engine<f64>, input: &[f64]) -> Vec<f64> {
        let raw: Vec<u8> = input.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut out = vec![0u8; raw.len()];
        engine.run(&raw, &mut out).unwrap();
        out.chunks_exact(8)
            .map(|c| {
                let mut word = [0u8; 8];
                word.copy_from_slice(c);
                f64::from_le_bytes(word)
            })
            .collect()
    }

    /// Deterministic values in [-0.5, 0.5)
    fn noise(len: usize, seed: u64) -> Vec<f64> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
            })
            .collect()
    }

    fn brute_force(signal: &[f64], impulse: &[f64]) -> Vec<f64> {
        (0..signal.len())
            .map(|n| {
                impulse
                    .iter()
                    .enumerate()
                    .take(n + 1)
                    .map(|(m, h)| h * signal[n - m])
                    .sum()
            })
            .collect()
    }

    fn filter_signal_f64(engine: &mut Engine<f64>, signal: &[f64]) -> Vec<f64> {
        signal
            .chunks_exact(engine.filter_length())
            .flat_map(|block| run_f64(engine, block))
            .collect()
    }

    #[test]
    fn test_identity_filter_scenario() {
        let mut engine = Engine::<f32>::new(&float_config(64, 1, 1)).unwrap();
        engine.set_coeff(&[coeff::dirac::<f32>(65)], 1, 1.0).unwrap();

        let mut input = vec![0.0f32; 64];
        input[0] = 0.5;
        input[1] = 0.25;
        let output = run_f32(&mut engine, &input);
        for (y, x) in output.iter().zip(&input) {
            assert!((y - x).abs() < 1e-6, "{} != {}", y, x);
        }
    }

    #[test]
    fn test_dirac_passthrough_all_block_lengths() {
        let mut length = 64;
        while length <= 8192 {
            let mut engine = Engine::<f32>::new(&float_config(length, 1, 1)).unwrap();
            engine.set_coeff(&[coeff::dirac::<f32>(length)], 1, 1.0).unwrap();

            for seed in 0..3 {
                let input: Vec<f32> = noise(length, seed).iter().map(|&v| v as f32).collect();
                let output = run_f32(&mut engine, &input);
                let error = output
                    .iter()
                    .zip(&input)
                    .map(|(y, x)| (y - x).abs())
                    .fold(0.0f32, f32::max);
                assert!(error < 1e-5, "length {}: error {}", length, error);
            }
            length *= 2;
        }
    }

    #[test]
    fn test_pure_delay() {
        let k = 5;
        let mut engine = Engine::<f32>::new(&float_config(64, 1, 1)).unwrap();
        let mut impulse = vec![0.0f32; 64];
        impulse[k] = 1.0;
        engine.set_coeff(&[impulse], 1, 1.0).unwrap();

        // Some history that reset must forget
        run_f32(&mut engine, &vec![0.3; 64]);
        engine.reset();

        let input: Vec<f32> = (0..64).map(|i| (i as f32 + 1.0) / 64.0).collect();
        let output = run_f32(&mut engine, &input);
        for n in 0..64 {
            let expected = if n < k { 0.0 } else { input[n - k] };
            assert!((output[n] - expected).abs() < 1e-6, "sample {}", n);
        }
    }

    #[test]
    fn test_partition_count_invariance() {
        let impulse: Vec<f64> = noise(256, 7)
            .iter()
            .enumerate()
            .map(|(i, v)| v * (-(i as f64) / 64.0).exp())
            .collect();
        let signal = noise(1024, 11);
        let reference = brute_force(&signal, &impulse);

        for (length, blocks) in [(64, 4), (32, 8), (256, 1)] {
            let mut engine = Engine::<f64>::new(&double_config(length, blocks)).unwrap();
            engine.set_coeff(&[impulse.as_slice()], blocks, 1.0).unwrap();
            let output = filter_signal_f64(&mut engine, &signal);
            for (n, (y, r)) in output.iter().zip(&reference).enumerate() {
                assert!((y - r).abs() < 1e-9, "{}x{} sample {}: {} != {}", blocks, length, n, y, r);
            }
        }
    }

    #[test]
    fn test_partition_count_invariance_single_precision() {
        let impulse: Vec<f32> = noise(4096, 3)
            .iter()
            .enumerate()
            .map(|(i, v)| (v * (-(i as f64) / 1024.0).exp()) as f32)
            .collect();
        let signal: Vec<f32> = noise(8192, 5).iter().map(|&v| v as f32).collect();

        let mut outputs = Vec::new();
        for (length, blocks) in [(1024, 4), (512, 8)] {
            let mut engine = Engine::<f32>::new(&float_config(length, blocks, 1)).unwrap();
            engine.set_coeff(&[impulse.as_slice()], blocks, 1.0).unwrap();
            let output: Vec<f32> = signal
                .chunks_exact(length)
                .flat_map(|block| run_f32(&mut engine, block))
                .collect();
            outputs.push(output);
        }
        for (a, b) in outputs[0].iter().zip(&outputs[1]) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_startup_ramp_after_reset() {
        let impulse = noise(128, 21);
        let mut engine = Engine::<f64>::new(&double_config(32, 4)).unwrap();
        engine.set_coeff(&[impulse.as_slice()], 4, 1.0).unwrap();

        // Fill every ring slot with unrelated history first
        filter_signal_f64(&mut engine, &noise(256, 99));
        engine.reset();

        let signal = noise(128, 42);
        let reference = brute_force(&signal, &impulse);
        let output = filter_signal_f64(&mut engine, &signal);
        for (n, (y, r)) in output.iter().zip(&reference).enumerate() {
            assert!((y - r).abs() < 1e-9, "sample {}: {} != {}", n, y, r);
        }
    }

    #[test]
    fn test_fewer_coefficient_blocks_than_partitions() {
        let impulse = noise(40, 8);
        let mut engine = Engine::<f64>::new(&double_config(16, 4)).unwrap();
        engine.set_coeff(&[impulse.as_slice()], 3, 1.0).unwrap();

        let signal = noise(160, 9);
        let reference = brute_force(&signal, &impulse);
        let output = filter_signal_f64(&mut engine, &signal);
        for (y, r) in output.iter().zip(&reference) {
            assert!((y - r).abs() < 1e-9);
        }
    }

    #[test]
    fn test_channels_without_coefficients_pass_through() {
        let mut engine = Engine::<f32>::new(&float_config(16, 2, 2)).unwrap();
        let mut gain = vec![0.0f32; 16];
        gain[0] = 2.0;
        engine.set_coeff(&[gain], 1, 1.0).unwrap();

        let left: Vec<f32> = (0..16).map(|i| i as f32 / 32.0).collect();
        let right: Vec<f32> = (0..16).map(|i| -(i as f32) / 64.0).collect();
        let interleaved: Vec<f32> = left.iter().zip(&right).flat_map(|(&l, &r)| [l, r]).collect();

        for _ in 0..3 {
            let output = run_f32(&mut engine, &interleaved);
            for n in 0..16 {
                assert!((output[2 * n] - 2.0 * left[n]).abs() < 1e-6);
                assert!((output[2 * n + 1] - right[n]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_clipping_is_reported() {
        let sink = Arc::new(BufferedSink::new());
        let config = FilterConfig::new(64, 1, 1, SampleFormat::F32Le, SampleFormat::S16Le, 44100)
            .with_sink(sink.clone());
        let mut engine = Engine::<f32>::new(&config).unwrap();
        engine.set_coeff(&[coeff::dirac::<f32>(64)], 1, 1.0).unwrap();

        let pattern = [1.5f32, 0.25, -1.5, -0.25];
        let input: Vec<f32> = pattern.iter().cycle().take(64).copied().collect();
        run_f32_to_s16(&mut engine, &input);

        let report = engine.check_overflows().unwrap();
        assert_eq!(report.channels[0].clipped, 32);
        let db = report.channels[0].peak_db.unwrap();
        assert!(db.is_finite() && db > 0.0);
        assert!(sink.contains("peak: 0/32/+3.5"));

        // Unchanged statistics are not reported twice
        assert!(engine.check_overflows().is_none());
    }

    fn run_f32_to_s16(engine: &mut Engine<f32>, input: &[f32]) -> Vec<i16> {
        let raw: Vec<u8> = input.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut out = vec![0u8; input.len() * 2];
        engine.run(&raw, &mut out).unwrap();
        out.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_full_scale_and_silence_peaks() {
        let config = FilterConfig::new(64, 1, 1, SampleFormat::F32Le, SampleFormat::S16Le, 44100)
            .with_sink(Arc::new(BufferedSink::new()));
        let mut engine = Engine::<f32>::new(&config).unwrap();
        engine.set_coeff(&[coeff::dirac::<f32>(64)], 1, 1.0).unwrap();

        run_f32_to_s16(&mut engine, &vec![0.0; 64]);
        let report = OverflowReport::from_records(engine.overflows());
        assert_eq!(report.to_string(), "peak: 0/0/-Inf");

        let mut input = vec![0.0f32; 64];
        input[10] = 32767.0 / 32768.0;
        let output = run_f32_to_s16(&mut engine, &input);
        assert_eq!(output[10], 32767);
        let report = OverflowReport::from_records(engine.overflows());
        assert_eq!(report.to_string(), "peak: 0/0/-0.00");

        // Nothing clipped, so nothing to report
        assert!(engine.check_overflows().is_none());
    }

    #[test]
    fn test_dithered_output_stays_close() {
        let config = FilterConfig::new(256, 1, 2, SampleFormat::F32Le, SampleFormat::S16Le, 8000)
            .with_dither(true)
            .with_sink(Arc::new(BufferedSink::new()));
        let mut engine = Engine::<f32>::new(&config).unwrap();
        engine.set_coeff(&[coeff::dirac::<f32>(256)], 1, 1.0).unwrap();

        let input = vec![0.25f32; 512];
        for _ in 0..4 {
            let output = run_f32_to_s16(&mut engine, &input);
            for &s in &output {
                assert!((s as i32 - 8192).abs() <= 3, "{}", s);
            }
        }
    }

    #[test]
    fn test_run_errors() {
        let sink = Arc::new(BufferedSink::new());
        let mut engine =
            Engine::<f32>::new(&float_config(16, 1, 1).with_sink(sink.clone())).unwrap();
        let input = vec![0u8; 64];
        let mut output = vec![0u8; 64];
        assert_eq!(engine.run(&input, &mut output), Err(RunError::NotReady));

        engine.set_coeff(&[coeff::dirac::<f32>(16)], 1, 1.0).unwrap();
        assert_eq!(
            engine.run(&input[..60], &mut output),
            Err(RunError::BufferSize {
                which: "input",
                expected: 64,
                actual: 60
            })
        );

        let mut nan = vec![0.0f32; 16];
        nan[0] = f32::NAN;
        let raw: Vec<u8> = nan.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(
            engine.run(&raw, &mut output),
            Err(RunError::NonFinite { channel: 0 })
        );
        assert!(sink.contains("NaN or Inf values in the system!"));

        engine.clear_coeff();
        assert!(!engine.is_initialized());
        assert_eq!(engine.run(&input, &mut output), Err(RunError::NotReady));
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            Engine::<f32>::new(&float_config(64, 1, 0)),
            Err(EngineError::InvalidChannelCount { channels: 0, .. })
        ));
        assert!(matches!(
            Engine::<f32>::new(&float_config(64, 1, MAX_CHANNELS + 1)),
            Err(EngineError::InvalidChannelCount { channels: 9, .. })
        ));
        assert!(matches!(
            Engine::<f32>::new(&float_config(100, 1, 1)),
            Err(EngineError::InvalidBlockLength(100))
        ));
        assert!(matches!(
            Engine::<f32>::new(&float_config(64, 0, 1)),
            Err(EngineError::InvalidBlockCount(0))
        ));
        assert!(matches!(
            Engine::<f64>::new(&float_config(64, 1, 1)),
            Err(EngineError::InvalidPrecision(4))
        ));

        let tiny = FilterConfig::new(1024, 1, 2, SampleFormat::F32Le, SampleFormat::S16Le, 48000)
            .with_dither(true)
            .with_max_dither_table_size(1000);
        assert!(matches!(
            Engine::<f32>::new(&tiny),
            Err(EngineError::DitherTableTooSmall { max_size: 1000, channels: 2, .. })
        ));
    }

    #[test]
    fn test_failed_set_coeff_keeps_previous_set() {
        let mut engine = Engine::<f32>::new(&float_config(16, 2, 1)).unwrap();
        engine.set_coeff(&[coeff::dirac::<f32>(16)], 1, 1.0).unwrap();

        let mut broken = vec![0.0f32; 32];
        broken[20] = f32::INFINITY;
        assert!(matches!(
            engine.set_coeff(&[broken], 2, 1.0),
            Err(CoeffError::Preprocess { channel: 0, block: 1 })
        ));
        assert!(matches!(
            engine.set_coeff(&[coeff::dirac::<f32>(16)], 3, 1.0),
            Err(CoeffError::InvalidBlockCount { blocks: 3, max: 2 })
        ));

        let input: Vec<f32> = (0..16).map(|i| i as f32 / 16.0).collect();
        let output = run_f32(&mut engine, &input);
        for (y, x) in output.iter().zip(&input) {
            assert!((y - x).abs() < 1e-6);
        }
    }

    struct MockSource {
        channels: usize,
        sample_rate: u32,
    }

    impl CoefficientSource for MockSource {
        fn describe(&self) -> String {
            "mock".to_string()
        }

        fn probe(&self) -> Result<(usize, u32), CoeffError> {
            Ok((self.channels, self.sample_rate))
        }

        fn load(&self, max_frames: usize) -> Result<CoeffData, CoeffError> {
            let mut impulse = vec![0.0; max_frames];
            impulse[0] = 0.5;
            Ok(CoeffData {
                channels: vec![impulse; self.channels],
                sample_rate: self.sample_rate,
            })
        }
    }

    #[test]
    fn test_set_coeff_from_source() {
        let mut filter = FirFilter::new(&float_config(16, 2, 2)).unwrap();
        assert_eq!(filter.precision(), Precision::Single);

        let wrong_rate = MockSource {
            channels: 2,
            sample_rate: 44100,
        };
        assert!(matches!(
            filter.set_coeff_from(&wrong_rate, 2, 1.0),
            Err(CoeffError::Incompatible(_))
        ));
        assert!(!filter.is_initialized());

        let source = MockSource {
            channels: 2,
            sample_rate: 48000,
        };
        assert_eq!(filter.set_coeff_from(&source, 2, 1.0).unwrap(), 2);
        assert!(filter.is_initialized());

        let input: Vec<u8> = [0.5f32, 1.0].iter().cycle().take(32).flat_map(|v| v.to_le_bytes()).collect();
        let mut output = vec![0u8; input.len()];
        filter.run(&input, &mut output).unwrap();
        let first = f32::from_le_bytes([output[0], output[1], output[2], output[3]]);
        let second = f32::from_le_bytes([output[4], output[5], output[6], output[7]]);
        assert!((first - 0.25).abs() < 1e-6);
        assert!((second - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_double_precision_filter() {
        let sink = Arc::new(BufferedSink::new());
        let mut filter = FirFilter::new(&double_config(32, 2).with_sink(sink.clone())).unwrap();
        assert_eq!(filter.precision(), Precision::Double);
        assert!(sink.contains("Filter ready: 1 channels, 2 x 32 taps, 64-bit reals"));
        assert!(sink.contains("Creating 4 FFT plans of size 64..."));

        filter.set_coeff(&[vec![0.0, 1.0]], 1, 0.5).unwrap();
        let input: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let raw: Vec<u8> = input.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut output = vec![0u8; raw.len()];
        filter.run(&raw, &mut output).unwrap();

        let samples: Vec<f64> = output
            .chunks_exact(8)
            .map(|c| {
                let mut word = [0u8; 8];
                word.copy_from_slice(c);
                f64::from_le_bytes(word)
            })
            .collect();
        assert!(samples[0].abs() < 1e-12);
        for n in 1..32 {
            assert!((samples[n] - 0.5 * input[n - 1]).abs() < 1e-9);
        }
    }
}
