//! Conversion between raw sample bytes and internal real buffers
//!
//! Decoding widens integer samples to integer-valued reals (a 16-bit sample
//! decodes to the ±32768 range) and float samples to their value. Encoding
//! expects reals in the same units, quantizes integers with a +0.5 mid-tread
//! bias, optionally adds dither, and records clipping in an [`Overflow`].

use crate::dither::{DitherState, DitherTable};
use crate::format::{BufferLayout, Endian};
use crate::overflow::Overflow;
use crate::real::Real;

/// Decode `out.len()` samples of one channel from `raw`
pub fn decode<T: Real>(raw: &[u8], layout: &BufferLayout, out: &mut [T]) {
    let spec = layout.spec;
    let shift = spec.shift();
    let little = spec.endian == Endian::Little;

    if spec.is_float {
        match (spec.bytes, little) {
            (4, true) => decode_with(raw, layout, out, |w| T::of(f32::from_le_bytes(w) as f64)),
            (4, false) => decode_with(raw, layout, out, |w| T::of(f32::from_be_bytes(w) as f64)),
            (8, true) => decode_with(raw, layout, out, |w| T::of(f64::from_le_bytes(w))),
            (_, _) => decode_with(raw, layout, out, |w| T::of(f64::from_be_bytes(w))),
        }
        return;
    }

    match (spec.bytes, little) {
        (1, _) => decode_with(raw, layout, out, |w: [u8; 1]| {
            T::of(((w[0] as i8 as i32) >> shift) as f64)
        }),
        (2, true) => decode_with(raw, layout, out, |w| {
            T::of(((i16::from_le_bytes(w) as i32) >> shift) as f64)
        }),
        (2, false) => decode_with(raw, layout, out, |w| {
            T::of(((i16::from_be_bytes(w) as i32) >> shift) as f64)
        }),
        // No native 3-byte type: place the word in the top of an i32 and shift down
        (3, true) => decode_with(raw, layout, out, |w: [u8; 3]| {
            T::of((i32::from_le_bytes([0, w[0], w[1], w[2]]) >> (shift + 8)) as f64)
        }),
        (3, false) => decode_with(raw, layout, out, |w: [u8; 3]| {
            T::of((i32::from_be_bytes([w[0], w[1], w[2], 0]) >> (shift + 8)) as f64)
        }),
        (_, true) => decode_with(raw, layout, out, |w| {
            T::of((i32::from_le_bytes(w) >> shift) as f64)
        }),
        (_, false) => decode_with(raw, layout, out, |w| {
            T::of((i32::from_be_bytes(w) >> shift) as f64)
        }),
    }
}

#[inline(always)]
fn decode_with<T: Real, const W: usize>(
    raw: &[u8],
    layout: &BufferLayout,
    out: &mut [T],
    read: impl Fn([u8; W]) -> T,
) {
    let stride = layout.spacing * W;
    let mut pos = layout.byte_offset;
    for sample in out.iter_mut() {
        let mut word = [0u8; W];
        word.copy_from_slice(&raw[pos..pos + W]);
        *sample = read(word);
        pos += stride;
    }
}

/// Encode `input` into `raw` without dither
pub fn encode<T: Real>(input: &[T], raw: &mut [u8], layout: &BufferLayout, overflow: &mut Overflow) {
    if layout.spec.is_float {
        encode_float(input, raw, layout, overflow);
        return;
    }
    let range = IntRange::<T>::new(layout.spec.significant_bits);
    encode_int(input, raw, layout, |_, sample| {
        quantize_plain(sample, &range, overflow)
    });
}

/// Encode `input` into `raw` with TPDF dither and error feedback.
///
/// Float formats are written exactly as [`encode`] does.
pub fn encode_dithered<T: Real>(
    input: &[T],
    raw: &mut [u8],
    layout: &BufferLayout,
    overflow: &mut Overflow,
    table: &DitherTable<T>,
    state: &mut DitherState<T>,
) {
    if layout.spec.is_float {
        encode_float(input, raw, layout, overflow);
        return;
    }
    let range = IntRange::<T>::new(layout.spec.significant_bits);
    table.begin_block(state, input.len());
    let window = *state;
    let feedback = &mut state.feedback;
    encode_int(input, raw, layout, |k, sample| {
        let offset = table.offset(&window, k);
        quantize_dithered(sample, &range, overflow, feedback, offset)
    });
}

/// Representable range of an integer format
#[derive(Debug, Clone, Copy)]
struct IntRange<T> {
    imin: i32,
    imax: i32,
    rmin: T,
    rmax: T,
    /// `imax + 1`, the first value that no longer truncates into range
    ceiling: T,
}

impl<T: Real> IntRange<T> {
    fn new(bits: u32) -> Self {
        let imin = -(1i64 << (bits - 1));
        let imax = (1i64 << (bits - 1)) - 1;
        Self {
            imin: imin as i32,
            imax: imax as i32,
            rmin: T::of(imin as f64),
            rmax: T::of(imax as f64),
            ceiling: T::of((imax + 1) as f64),
        }
    }
}

#[inline(always)]
fn quantize_plain<T: Real>(sample: T, range: &IntRange<T>, overflow: &mut Overflow) -> i32 {
    let x = sample + T::HALF;
    let s = if x < T::ZERO {
        if x <= range.rmin {
            overflow.record_clip(sample.as_f64());
            return range.imin;
        }
        x.trunc_i32() - 1
    } else {
        // Anything short of imax + 1 still truncates to a representable value
        if x >= range.ceiling {
            overflow.record_clip(sample.as_f64());
            return range.imax;
        }
        x.trunc_i32()
    };
    overflow.record_int(s);
    s
}

#[inline(always)]
fn quantize_dithered<T: Real>(
    sample: T,
    range: &IntRange<T>,
    overflow: &mut Overflow,
    feedback: &mut [T; 2],
    offset: T,
) -> i32 {
    // First-order high-pass shaping of the truncation error
    let x = sample + feedback[0] - feedback[1];
    feedback[1] = feedback[0];
    let d = x + offset;

    let (s, reached) = if d < T::ZERO {
        if d <= range.rmin {
            overflow.record_clip(x.as_f64());
            (range.imin, range.rmin)
        } else {
            let s = d.trunc_i32() - 1;
            overflow.record_int(s);
            (s, x)
        }
    } else if d >= range.ceiling {
        overflow.record_clip(x.as_f64());
        (range.imax, range.rmax)
    } else {
        let s = d.trunc_i32();
        overflow.record_int(s);
        (s, x)
    };

    // Only the quantization error is shaped, never the clipped excess
    feedback[0] = reached - T::of(s as f64);
    s
}

fn encode_int<T: Real>(
    input: &[T],
    raw: &mut [u8],
    layout: &BufferLayout,
    quantize: impl FnMut(usize, T) -> i32,
) {
    let shift = layout.spec.shift();
    let little = layout.spec.endian == Endian::Little;
    match (layout.spec.bytes, little) {
        (1, _) => encode_with(input, raw, layout, quantize, |v| [(v << shift) as u8]),
        (2, true) => encode_with(input, raw, layout, quantize, |v| {
            ((v << shift) as i16).to_le_bytes()
        }),
        (2, false) => encode_with(input, raw, layout, quantize, |v| {
            ((v << shift) as i16).to_be_bytes()
        }),
        (3, true) => encode_with(input, raw, layout, quantize, |v| {
            let b = (v << shift).to_le_bytes();
            [b[0], b[1], b[2]]
        }),
        (3, false) => encode_with(input, raw, layout, quantize, |v| {
            let b = (v << shift).to_le_bytes();
            [b[2], b[1], b[0]]
        }),
        (_, true) => encode_with(input, raw, layout, quantize, |v| (v << shift).to_le_bytes()),
        (_, false) => encode_with(input, raw, layout, quantize, |v| (v << shift).to_be_bytes()),
    }
}

#[inline(always)]
fn encode_with<T: Real, const W: usize>(
    input: &[T],
    raw: &mut [u8],
    layout: &BufferLayout,
    mut quantize: impl FnMut(usize, T) -> i32,
    write: impl Fn(i32) -> [u8; W],
) {
    let stride = layout.spacing * W;
    let mut pos = layout.byte_offset;
    for (k, &sample) in input.iter().enumerate() {
        let word = write(quantize(k, sample));
        raw[pos..pos + W].copy_from_slice(&word);
        pos += stride;
    }
}

fn encode_float<T: Real>(input: &[T], raw: &mut [u8], layout: &BufferLayout, overflow: &mut Overflow) {
    let little = layout.spec.endian == Endian::Little;
    match (layout.spec.bytes, little) {
        (4, true) => write_float(input, raw, layout, overflow, |v| (v as f32).to_le_bytes()),
        (4, false) => write_float(input, raw, layout, overflow, |v| (v as f32).to_be_bytes()),
        (_, true) => write_float(input, raw, layout, overflow, |v| v.to_le_bytes()),
        (_, false) => write_float(input, raw, layout, overflow, |v| v.to_be_bytes()),
    }
}

#[inline(always)]
fn write_float<T: Real, const W: usize>(
    input: &[T],
    raw: &mut [u8],
    layout: &BufferLayout,
    overflow: &mut Overflow,
    write: impl Fn(f64) -> [u8; W],
) {
    let stride = layout.spacing * W;
    let mut pos = layout.byte_offset;
    for &sample in input {
        let value = sample.as_f64();
        overflow.update_real(value);
        raw[pos..pos + W].copy_from_slice(&write(value));
        pos += stride;
    }
}
