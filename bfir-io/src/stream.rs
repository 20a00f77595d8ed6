//! Feeding arbitrary-length audio through a block filter

use bfir_engine::{FilterConfig, FirFilter, OverflowReport, SampleFormat, SampleSpec};

use crate::error::IoError;
use crate::preconvolve::{float_format, to_raw};

/// Accumulates interleaved samples into whole filter blocks.
///
/// Input is handed over in the filter's native float format; output comes
/// back as raw bytes in the configured output format.
pub struct BlockStream {
    filter: FirFilter,
    channels: usize,
    filter_length: usize,
    input_format: SampleFormat,
    output: SampleSpec,
    /// Interleaved samples waiting for a full block
    pending: Vec<f64>,
    raw_out: Vec<u8>,
    frames_in: usize,
    frames_out: usize,
    last_report: Option<OverflowReport>,
}

impl BlockStream {
    /// Build the filter described by `config`, replacing its input format
    pub fn new(config: &FilterConfig) -> Result<Self, IoError> {
        let input_format = float_format(config.precision);
        let mut config = config.clone();
        config.input = input_format.spec();
        let filter = FirFilter::new(&config)?;

        Ok(Self {
            channels: config.channels,
            filter_length: config.filter_length,
            input_format,
            output: config.output,
            pending: Vec::with_capacity(config.filter_length * config.channels),
            raw_out: vec![0; config.output_block_bytes()],
            frames_in: 0,
            frames_out: 0,
            last_report: None,
            filter,
        })
    }

    pub fn filter(&self) -> &FirFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FirFilter {
        &mut self.filter
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Bytes per output frame
    pub fn frame_bytes(&self) -> usize {
        self.output.bytes * self.channels
    }

    pub fn frames_in(&self) -> usize {
        self.frames_in
    }

    pub fn frames_out(&self) -> usize {
        self.frames_out
    }

    /// Most recent overflow report with new clipping
    pub fn last_report(&self) -> Option<&OverflowReport> {
        self.last_report.as_ref()
    }

    /// Peaks and clip counts since the start
    pub fn report(&self) -> OverflowReport {
        OverflowReport::from_records(self.filter.overflows())
    }

    /// Queue interleaved `samples` and return the output of every block
    /// completed by them
    pub fn process(&mut self, samples: &[f64]) -> Result<Vec<u8>, IoError> {
        if samples.len() % self.channels != 0 {
            return Err(IoError::Incompatible(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                self.channels
            )));
        }
        self.frames_in += samples.len() / self.channels;

        let block = self.filter_length * self.channels;
        let mut output = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (block - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == block {
                self.run_pending(&mut output)?;
            }
        }
        Ok(output)
    }

    /// Feed `tail_frames` of silence, pad the last block and return the
    /// remaining output, trimmed to the frames fed in so far
    pub fn finish(&mut self, tail_frames: usize) -> Result<Vec<u8>, IoError> {
        let total = self.frames_in + tail_frames;
        let mut output = self.process(&vec![0.0; tail_frames * self.channels])?;
        if !self.pending.is_empty() {
            self.pending.resize(self.filter_length * self.channels, 0.0);
            self.run_pending(&mut output)?;
        }

        let emitted_before = self.frames_out - output.len() / self.frame_bytes();
        let keep = total.saturating_sub(emitted_before) * self.frame_bytes();
        output.truncate(keep);
        self.frames_in = total;
        self.frames_out = total;
        Ok(output)
    }

    fn run_pending(&mut self, output: &mut Vec<u8>) -> Result<(), IoError> {
        let raw_in = to_raw(&self.pending, self.input_format);
        self.filter.run(&raw_in, &mut self.raw_out)?;
        self.pending.clear();
        output.extend_from_slice(&self.raw_out);
        self.frames_out += self.filter_length;

        // The filter logs new clipping through its own report sink
        if let Some(report) = self.filter.check_overflows() {
            self.last_report = Some(report);
        }
        Ok(())
    }
}
