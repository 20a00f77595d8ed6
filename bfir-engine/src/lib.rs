//! Convolution core for BFIR - partitioned overlap-save FIR filtering
//!
//! Raw interleaved sample blocks go in, filtered blocks come out. The
//! [`FirFilter`] owns every buffer it touches; one `run` call never allocates.

mod codec;
mod coeff;
mod dither;
mod engine;
mod error;
mod format;
mod log;
mod overflow;
mod real;
pub mod transform;

pub use codec::{decode, encode, encode_dithered};
pub use coeff::{dirac, preprocess, CoeffSet};
pub use dither::{DitherState, DitherTable, Tausworthe};
pub use engine::{CoeffData, CoefficientSource, Engine, FilterConfig, FirFilter, MAX_CHANNELS};
pub use error::{CoeffError, EngineError, RunError, TransformError};
pub use format::{BufferLayout, Endian, SampleFormat, SampleSpec};
pub use log::{default_sink, BufferedSink, LogSink, SharedSink, TracingSink};
pub use overflow::{ChannelPeak, Overflow, OverflowReport, OverflowTracker};
pub use real::{log2_exact, next_multiple, next_power_of_two, Precision, Real};
pub use transform::{ShortFilter, Transform};
