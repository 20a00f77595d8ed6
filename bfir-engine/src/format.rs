//! Raw sample format descriptors

use crate::error::EngineError;

/// Byte order of a sample word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Named raw sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S8,
    S16Le,
    S16Be,
    S24Le,
    S24Be,
    S32Le,
    S32Be,
    F32Le,
    F32Be,
    F64Le,
    F64Be,
}

impl SampleFormat {
    /// All named formats
    pub const ALL: [SampleFormat; 11] = [
        SampleFormat::S8,
        SampleFormat::S16Le,
        SampleFormat::S16Be,
        SampleFormat::S24Le,
        SampleFormat::S24Be,
        SampleFormat::S32Le,
        SampleFormat::S32Be,
        SampleFormat::F32Le,
        SampleFormat::F32Be,
        SampleFormat::F64Le,
        SampleFormat::F64Be,
    ];

    /// Container width in bytes
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::S8 => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::S24Le | SampleFormat::S24Be => 3,
            SampleFormat::S32Le | SampleFormat::S32Be => 4,
            SampleFormat::F32Le | SampleFormat::F32Be => 4,
            SampleFormat::F64Le | SampleFormat::F64Be => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            SampleFormat::F32Le | SampleFormat::F32Be | SampleFormat::F64Le | SampleFormat::F64Be
        )
    }

    pub fn endian(self) -> Endian {
        match self {
            SampleFormat::S16Be
            | SampleFormat::S24Be
            | SampleFormat::S32Be
            | SampleFormat::F32Be
            | SampleFormat::F64Be => Endian::Big,
            _ => Endian::Little,
        }
    }

    /// Descriptor using the full container width
    pub fn spec(self) -> SampleSpec {
        SampleSpec {
            bytes: self.bytes(),
            significant_bits: (self.bytes() * 8) as u32,
            is_float: self.is_float(),
            endian: self.endian(),
        }
    }

    /// Parse names like `s16_le`, `S24_BE` or `f32_le`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::S8 => "s8",
            SampleFormat::S16Le => "s16_le",
            SampleFormat::S16Be => "s16_be",
            SampleFormat::S24Le => "s24_le",
            SampleFormat::S24Be => "s24_be",
            SampleFormat::S32Le => "s32_le",
            SampleFormat::S32Be => "s32_be",
            SampleFormat::F32Le => "f32_le",
            SampleFormat::F32Be => "f32_be",
            SampleFormat::F64Le => "f64_le",
            SampleFormat::F64Be => "f64_be",
        }
    }
}

/// Width, significance and byte order of one sample word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    /// Container width in bytes
    pub bytes: usize,
    /// Bits carrying signal, aligned to the top of the container
    pub significant_bits: u32,
    pub is_float: bool,
    pub endian: Endian,
}

impl SampleSpec {
    /// Narrow the significant width, e.g. 20-bit audio in a 24-bit container
    pub fn with_significant_bits(mut self, bits: u32) -> Self {
        self.significant_bits = bits;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let container_bits = (self.bytes * 8) as u32;
        let valid = if self.is_float {
            matches!(self.bytes, 4 | 8) && self.significant_bits == container_bits
        } else {
            matches!(self.bytes, 1..=4)
                && self.significant_bits >= 1
                && self.significant_bits <= container_bits
        };
        if valid {
            Ok(())
        } else {
            Err(EngineError::UnsupportedFormat(format!(
                "{} bytes, {} significant bits, {}",
                self.bytes,
                self.significant_bits,
                if self.is_float { "float" } else { "integer" }
            )))
        }
    }

    /// Insignificant low bits discarded on decode and restored on encode
    pub fn shift(&self) -> u32 {
        (self.bytes * 8) as u32 - self.significant_bits
    }

    /// Factor mapping decoded values to the nominal ±1 range
    pub fn normalized_scale(&self) -> f64 {
        if self.is_float {
            1.0
        } else {
            1.0 / (1u64 << (self.significant_bits - 1)) as f64
        }
    }

    /// Factor mapping the nominal ±1 range to encoder input values
    pub fn full_scale(&self) -> f64 {
        if self.is_float {
            1.0
        } else {
            (1u64 << (self.significant_bits - 1)) as f64
        }
    }

    /// Largest representable magnitude in encoder units
    pub fn max_value(&self) -> f64 {
        if self.is_float {
            1.0
        } else {
            ((1u64 << (self.significant_bits - 1)) - 1) as f64
        }
    }
}

impl From<SampleFormat> for SampleSpec {
    fn from(format: SampleFormat) -> Self {
        format.spec()
    }
}

/// Position of one channel's samples inside a raw buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub spec: SampleSpec,
    /// Offset of the first sample in bytes
    pub byte_offset: usize,
    /// Distance between consecutive samples, in samples
    pub spacing: usize,
}

impl BufferLayout {
    /// Channel `channel` of standard interleaved PCM with `channels` channels
    pub fn interleaved(spec: SampleSpec, channel: usize, channels: usize) -> Self {
        Self {
            spec,
            byte_offset: channel * spec.bytes,
            spacing: channels,
        }
    }

    /// A single channel stored back to back
    pub fn contiguous(spec: SampleSpec) -> Self {
        Self::interleaved(spec, 0, 1)
    }

    /// Bytes needed to hold `samples` samples with this layout
    pub fn required_bytes(&self, samples: usize) -> usize {
        if samples == 0 {
            return 0;
        }
        self.byte_offset + ((samples - 1) * self.spacing + 1) * self.spec.bytes
    }
}
