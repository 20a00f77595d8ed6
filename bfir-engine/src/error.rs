//! Error types for the convolution core

use thiserror::Error;

/// Errors raised while constructing a filter
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid real size {0}, expected 4 or 8 bytes")]
    InvalidPrecision(usize),
    #[error("invalid filter length {0}, must be a power of two of at least 4")]
    InvalidBlockLength(usize),
    #[error("invalid block count {0}")]
    InvalidBlockCount(usize),
    #[error("invalid channel count {channels}, must be between 1 and {max}")]
    InvalidChannelCount { channels: usize, max: usize },
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("dither table too small: {max_size} bytes for {channels} channels, need {required}")]
    DitherTableTooSmall {
        max_size: usize,
        channels: usize,
        required: usize,
    },
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
}

/// Errors from the spectral transform engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("invalid transform length {0}")]
    InvalidLength(usize),
    #[error("transform order {0} out of range")]
    OrderOutOfRange(u32),
    #[error("NaN or Inf value among coefficients")]
    NonFinite,
    #[error("buffer length {actual} does not match transform size {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Errors raised while assigning a coefficient set
#[derive(Error, Debug)]
pub enum CoeffError {
    #[error("incompatible coefficients: {0}")]
    Incompatible(String),
    #[error("failed to load coefficients: {0}")]
    Load(String),
    #[error("failed to preprocess coefficient block {block} of channel {channel}")]
    Preprocess { channel: usize, block: usize },
    #[error("invalid coefficient block count {blocks}, filter holds {max}")]
    InvalidBlockCount { blocks: usize, max: usize },
}

/// Errors raised by a single `run` call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("filter has no coefficients")]
    NotReady,
    #[error("{which} buffer holds {actual} bytes, expected {expected}")]
    BufferSize {
        which: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("NaN or Inf values in channel {channel}")]
    NonFinite { channel: usize },
}
