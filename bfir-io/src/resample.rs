//! Sample-rate conversion for impulse responses and program material

use rubato::{FftFixedInOut, Resampler};

use crate::error::IoError;
use crate::sound::{deinterleave, interleave};

/// Input frames per resampler call
const CHUNK_FRAMES: usize = 1024;

fn resample_error(e: impl std::fmt::Display) -> IoError {
    IoError::Resample(e.to_string())
}

/// Frames `frames` occupy at `target_rate`, rounded up
fn converted_length(frames: usize, source_rate: u32, target_rate: u32) -> usize {
    (frames as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize
}

/// Resample interleaved `samples` from `source_rate` to `target_rate`.
///
/// Output is time-aligned with the input: the converter's group delay is
/// removed and the input is flushed with silence until the last input frame
/// has come through. The result holds `ceil(frames * target / source)`
/// frames.
pub fn resample(
    samples: &[f64],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f64>, IoError> {
    if channels == 0 {
        return Err(resample_error("no channels"));
    }
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(resample_error(format!(
            "cannot convert {} Hz to {} Hz",
            source_rate, target_rate
        )));
    }

    let planar = deinterleave(samples, channels);
    let frames = planar.first().map_or(0, Vec::len);
    let wanted = converted_length(frames, source_rate, target_rate);
    if wanted == 0 {
        return Ok(Vec::new());
    }

    let mut converter = FftFixedInOut::<f64>::new(
        source_rate as usize,
        target_rate as usize,
        CHUNK_FRAMES,
        channels,
    )
    .map_err(resample_error)?;
    let skip = converter.output_delay();
    let chunk = converter.input_frames_next();

    let mut converted: Vec<Vec<f64>> = (0..channels)
        .map(|_| Vec::with_capacity(skip + wanted + chunk))
        .collect();
    let mut window = vec![vec![0.0; chunk]; channels];
    let mut start = 0;
    // Past the input end the window is all zeros, which drains the tail
    while converted[0].len() < skip + wanted {
        for (dst, src) in window.iter_mut().zip(&planar) {
            let from = start.min(frames);
            let to = (start + chunk).min(frames);
            dst[..to - from].copy_from_slice(&src[from..to]);
            dst[to - from..].fill(0.0);
        }
        let block = converter.process(&window, None).map_err(resample_error)?;
        for (out, data) in converted.iter_mut().zip(block) {
            out.extend(data);
        }
        start += chunk;
    }

    for out in converted.iter_mut() {
        out.drain(..skip);
        out.truncate(wanted);
    }

    tracing::debug!(
        "Resampled {} frames at {} Hz to {} frames at {} Hz ({} frames of delay removed)",
        frames,
        source_rate,
        wanted,
        target_rate,
        skip
    );
    Ok(interleave(&converted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirac(len: usize, at: usize) -> Vec<f64> {
        let mut v = vec![0.0; len];
        v[at] = 1.0;
        v
    }

    fn argmax(v: &[f64]) -> usize {
        v.iter()
            .enumerate()
            .fold((0, 0.0f64), |(bi, bv), (i, &x)| {
                if x.abs() > bv {
                    (i, x.abs())
                } else {
                    (bi, bv)
                }
            })
            .0
    }

    #[test]
    fn test_same_rate_is_copy() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resample(&samples, 2, 48000, 48000).unwrap(), samples);
    }

    #[test]
    fn test_length_follows_rate_ratio() {
        let frames = 44100;
        let samples: Vec<f64> = (0..frames * 2)
            .map(|i| ((i / 2) as f64 * 2.0 * std::f64::consts::PI * 440.0 / 44100.0).sin())
            .collect();
        let out = resample(&samples, 2, 44100, 48000).unwrap();
        assert_eq!(out.len(), 48000 * 2);

        // Away from the edges a 440 Hz tone keeps its level
        let peak = out[20000..40000].iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!((peak - 1.0).abs() < 0.05, "{}", peak);
    }

    #[test]
    fn test_leading_dirac_stays_at_start() {
        let out = resample(&dirac(4096, 0), 1, 44100, 48000).unwrap();
        assert_eq!(out.len(), 4459);
        assert!(argmax(&out) <= 1, "peak at {}", argmax(&out));
        assert!(out[0].abs() > 0.5, "{}", out[0]);
    }

    #[test]
    fn test_trailing_dirac_survives() {
        let out = resample(&dirac(4096, 4095), 1, 44100, 48000).unwrap();
        assert_eq!(out.len(), 4459);
        // 4095 * 48000 / 44100 lands just past 4457
        let peak = argmax(&out);
        assert!((4455..4459).contains(&peak), "peak at {}", peak);
        let energy: f64 = out[4443..].iter().map(|v| v * v).sum();
        assert!(energy > 0.1, "{}", energy);
    }

    #[test]
    fn test_downsampling_keeps_channels_apart() {
        let mut samples = vec![0.0; 2 * 2000];
        samples[2 * 100] = 1.0;
        samples[2 * 1500 + 1] = 1.0;
        let out = resample(&samples, 2, 48000, 32000).unwrap();
        assert_eq!(out.len(), 2 * 1334);
        let planar = deinterleave(&out, 2);
        assert!((argmax(&planar[0]) as i64 - 67).abs() <= 1);
        assert!((argmax(&planar[1]) as i64 - 1000).abs() <= 1);
    }

    #[test]
    fn test_rejects_zero_channels() {
        assert!(matches!(
            resample(&[], 0, 44100, 48000),
            Err(IoError::Resample(_))
        ));
    }
}
