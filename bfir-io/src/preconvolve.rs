//! Offline helpers built on the engine: impulse chaining and attenuation

use std::path::{Path, PathBuf};

use bfir_engine::{next_multiple, FilterConfig, FirFilter, Precision, SampleFormat};
use rand::Rng;

use crate::error::IoError;
use crate::loaders::{dirac_coeffs, load_sound_coeffs};
use crate::sound::{self, SoundInfo};

/// An impulse response file and the gain applied to it
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseInfo {
    pub path: PathBuf,
    pub scale: f64,
}

impl ImpulseInfo {
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }

    /// Gain given as a level in dB
    pub fn with_level_db(path: impl Into<PathBuf>, level_db: f64) -> Self {
        Self::new(path, db_to_scale(level_db))
    }
}

pub fn db_to_scale(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Bernstein's string hash
pub fn djb_hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(5381u32, |hash, &b| {
        (hash << 5).wrapping_add(hash).wrapping_add(b as u32)
    })
}

/// Native-endian float format matching a precision
pub fn float_format(precision: Precision) -> SampleFormat {
    match precision {
        Precision::Single => SampleFormat::F32Le,
        Precision::Double => SampleFormat::F64Le,
    }
}

pub(crate) fn to_raw(samples: &[f64], format: SampleFormat) -> Vec<u8> {
    match format {
        SampleFormat::F32Le => samples.iter().flat_map(|&v| (v as f32).to_le_bytes()).collect(),
        _ => samples.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

pub(crate) fn from_raw(raw: &[u8], format: SampleFormat) -> Vec<f64> {
    match format {
        SampleFormat::F32Le => raw
            .chunks_exact(4)
            .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]) as f64)
            .collect(),
        _ => raw
            .chunks_exact(8)
            .map(|w| {
                let mut word = [0u8; 8];
                word.copy_from_slice(w);
                f64::from_le_bytes(word)
            })
            .collect(),
    }
}

/// Run interleaved `input` through `filter` block by block
pub(crate) fn run_blocks(
    filter: &mut FirFilter,
    input: &[f64],
    format: SampleFormat,
) -> Result<Vec<f64>, IoError> {
    let block_bytes = filter.filter_length() * filter.channels() * format.bytes();
    let raw_in = to_raw(input, format);
    let mut raw_out = vec![0u8; raw_in.len()];
    for (inp, out) in raw_in
        .chunks_exact(block_bytes)
        .zip(raw_out.chunks_exact_mut(block_bytes))
    {
        filter.run(inp, out)?;
    }
    Ok(from_raw(&raw_out, format))
}

/// Convolve a chain of impulse responses into one and save it in `out_dir`.
///
/// The result is named after a hash of the input paths and reused when it
/// already exists. Each impulse contributes with its own scale.
pub fn convolve_impulses(
    impulses: &[ImpulseInfo],
    filter_length: usize,
    precision: Precision,
    out_dir: &Path,
) -> Result<PathBuf, IoError> {
    let mut shape: Option<SoundInfo> = None;
    let mut max_frames = 0;
    let mut names = String::new();

    for impulse in impulses {
        let info = sound::probe(&impulse.path)?;
        if let Some(first) = shape {
            if first.channels != info.channels || first.sample_rate != info.sample_rate {
                return Err(IoError::Incompatible(format!(
                    "{} has {} channels at {} Hz, expected {} channels at {} Hz",
                    impulse.path.display(),
                    info.channels,
                    info.sample_rate,
                    first.channels,
                    first.sample_rate
                )));
            }
        }
        shape = Some(info);
        max_frames = max_frames.max(info.frames);
        names.push_str(&impulse.path.to_string_lossy());
    }
    let shape = shape.ok_or_else(|| IoError::Incompatible("no impulse responses".to_string()))?;
    if max_frames == 0 {
        return Err(IoError::Incompatible("impulse responses are empty".to_string()));
    }

    let length = next_multiple(max_frames, filter_length);
    let blocks = length / filter_length;
    let channels = shape.channels;

    let out_path = out_dir.join(format!(
        "file-{:x}-{}-{}-{}-{}.wav",
        djb_hash(names.as_bytes()),
        max_frames,
        precision.realsize(),
        channels,
        shape.sample_rate
    ));
    if out_path.exists() {
        tracing::debug!("Using cached impulse {}", out_path.display());
        return Ok(out_path);
    }

    let format = float_format(precision);
    let config = FilterConfig::new(filter_length, blocks, channels, format, format, shape.sample_rate)
        .with_precision(precision);
    let mut filter = FirFilter::new(&config)?;
    filter.set_coeff(&dirac_coeffs(channels, filter_length), blocks, 1.0)?;

    let mut output = Vec::new();
    for impulse in impulses {
        let mut input = sound::load_frames(&impulse.path, length, true)?;
        input.samples.iter_mut().for_each(|s| *s *= impulse.scale);

        filter.reset();
        output = run_blocks(&mut filter, &input.samples, format)?;
        filter.set_coeff(&sound::deinterleave(&output, channels), blocks, 1.0)?;
    }

    output.truncate(max_frames * channels);
    sound::save(&out_path, &output, channels, shape.sample_rate)?;
    tracing::info!(
        "Convolved {} impulses into {}",
        impulses.len(),
        out_path.display()
    );
    Ok(out_path)
}

/// Reduce a chain of impulses to one file and the scale to apply to it.
///
/// A single impulse is used as is; longer chains are convolved together with
/// their scales folded into the result.
pub fn build_chain(
    impulses: &[ImpulseInfo],
    filter_length: usize,
    precision: Precision,
    out_dir: &Path,
) -> Result<(PathBuf, f64), IoError> {
    match impulses {
        [] => Err(IoError::Incompatible("no impulse responses".to_string())),
        [single] => Ok((single.path.clone(), single.scale)),
        _ => Ok((
            convolve_impulses(impulses, filter_length, precision, out_dir)?,
            1.0,
        )),
    }
}

/// Recommended attenuation of an impulse response file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    /// Non-positive gain in dB that keeps full-scale noise from clipping
    pub db: f64,
    pub info: SoundInfo,
}

/// Run full-scale white noise through the impulse response in `path`
pub fn calculate_attenuation(
    path: &Path,
    filter_length: usize,
    precision: Precision,
) -> Result<Attenuation, IoError> {
    let info = sound::probe(path)?;
    let length = next_multiple(info.frames.max(1), filter_length);
    let data = load_sound_coeffs(path, length)?;
    let db = attenuation_for(
        &data.channels,
        info.sample_rate,
        filter_length,
        precision,
        &mut rand::thread_rng(),
    )?;
    Ok(Attenuation { db, info })
}

/// Attenuation for in-memory coefficients, drawing noise from `rng`
pub fn attenuation_for<C: AsRef<[f64]>, R: Rng>(
    coeffs: &[C],
    sample_rate: u32,
    filter_length: usize,
    precision: Precision,
    rng: &mut R,
) -> Result<f64, IoError> {
    let channels = coeffs.len();
    let frames = coeffs.iter().map(|c| c.as_ref().len()).max().unwrap_or(0);
    if frames == 0 {
        return Err(IoError::Incompatible("impulse response is empty".to_string()));
    }
    let blocks = next_multiple(frames, filter_length) / filter_length;

    let format = float_format(precision);
    let config = FilterConfig::new(filter_length, blocks, channels, format, format, sample_rate)
        .with_precision(precision);
    let mut filter = FirFilter::new(&config)?;
    filter.set_coeff(coeffs, blocks, 1.0)?;

    let noise = sound::white_noise(channels, filter_length * blocks, rng);
    let output = run_blocks(&mut filter, &noise, format)?;
    let max = output.iter().fold(0.0f64, |m, v| m.max(v.abs()));

    Ok(if max > 1.0 { -20.0 * max.log10() } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bfir-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_djb_hash() {
        assert_eq!(djb_hash(b""), 5381);
        assert_eq!(djb_hash(b"a"), 5381 * 33 + 97);
        assert_ne!(djb_hash(b"ab"), djb_hash(b"ba"));
    }

    #[test]
    fn test_db_to_scale() {
        assert!((db_to_scale(0.0) - 1.0).abs() < 1e-12);
        assert!((db_to_scale(-20.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_convolve_two_impulses() {
        let dir = temp_dir("preconv");
        let a = dir.join("a.wav");
        let b = dir.join("b.wav");
        sound::save(&a, &[1.0, 0.5], 1, 48000).unwrap();
        sound::save(&b, &[0.0, 1.0, 0.0, 0.25], 1, 48000).unwrap();

        let impulses = [ImpulseInfo::new(&a, 1.0), ImpulseInfo::new(&b, 0.5)];
        let out = convolve_impulses(&impulses, 4, Precision::Double, &dir.join("out")).unwrap();
        let name = out.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("file-"));
        assert!(name.ends_with("-4-8-1-48000.wav"), "{}", name);

        let result = sound::load(&out).unwrap();
        let expected = [0.0, 0.5, 0.25, 0.125];
        assert_eq!(result.frames(), 4);
        for (got, want) in result.samples.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }

        // Second call reuses the cached file
        let again = convolve_impulses(&impulses, 4, Precision::Double, &dir.join("out")).unwrap();
        assert_eq!(again, out);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_build_chain() {
        let dir = temp_dir("chain");
        let a = dir.join("a.wav");
        sound::save(&a, &[1.0, 0.5], 1, 48000).unwrap();

        let single = [ImpulseInfo::with_level_db(&a, -6.0)];
        let (path, scale) = build_chain(&single, 4, Precision::Single, &dir).unwrap();
        assert_eq!(path, a);
        assert!((scale - 0.501).abs() < 1e-3);

        let pair = [ImpulseInfo::new(&a, 2.0), ImpulseInfo::new(&a, 1.0)];
        let (path, scale) = build_chain(&pair, 4, Precision::Single, &dir).unwrap();
        assert_ne!(path, a);
        assert_eq!(scale, 1.0);
        let result = sound::load(&path).unwrap();
        // (2, 1) * (1, 0.5), truncated to the longest input
        assert!((result.samples[0] - 2.0).abs() < 1e-5);
        assert!((result.samples[1] - 2.0).abs() < 1e-5);

        assert!(build_chain(&[], 4, Precision::Single, &dir).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_convolve_rejects_mismatched_rates() {
        let dir = temp_dir("preconv-rates");
        let a = dir.join("a.wav");
        let b = dir.join("b.wav");
        sound::save(&a, &[1.0], 1, 48000).unwrap();
        sound::save(&b, &[1.0], 1, 44100).unwrap();

        let impulses = [ImpulseInfo::new(&a, 1.0), ImpulseInfo::new(&b, 1.0)];
        assert!(matches!(
            convolve_impulses(&impulses, 4, Precision::Single, &dir),
            Err(IoError::Incompatible(_))
        ));
        assert!(matches!(
            convolve_impulses(&[], 4, Precision::Single, &dir),
            Err(IoError::Incompatible(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_attenuation_of_gain() {
        let mut rng = StdRng::seed_from_u64(1);
        let db = attenuation_for(&[vec![4.0]], 48000, 1024, Precision::Double, &mut rng).unwrap();
        // Noise peaks just below 1.0, so the loudest output is just below 4.0
        assert!(db > -12.05 && db < -11.9, "{}", db);

        let quiet =
            attenuation_for(&[vec![0.5], vec![0.25]], 48000, 64, Precision::Single, &mut rng)
                .unwrap();
        assert_eq!(quiet, 0.0);
    }

    #[test]
    fn test_calculate_attenuation_from_file() {
        let dir = temp_dir("atten");
        let path = dir.join("ir.wav");
        sound::save(&path, &[2.0, 2.0, 0.0, 0.0], 2, 44100).unwrap();

        let result = calculate_attenuation(&path, 256, Precision::Single).unwrap();
        assert_eq!(result.info.channels, 2);
        assert_eq!(result.info.frames, 2);
        assert!(result.db < -5.0 && result.db > -6.1, "{}", result.db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
