//! Coefficient loaders and sources
//!
//! Every loader returns plain `f64` buffers; narrowing to the filter's
//! precision happens inside the engine.

use std::fs;
use std::path::{Path, PathBuf};

use bfir_engine::{
    decode, BufferLayout, CoeffData, CoeffError, CoefficientSource, SampleSpec,
};

use crate::error::IoError;
use crate::sound;

/// One impulse per channel, each `length` samples with 1.0 at index 0
pub fn dirac_coeffs(channels: usize, length: usize) -> Vec<Vec<f64>> {
    (0..channels).map(|_| bfir_engine::dirac::<f64>(length)).collect()
}

/// Parse one coefficient per line. `max_length` of 0 means no limit.
pub fn parse_text_coeffs(content: &str, max_length: usize) -> Result<Vec<f64>, IoError> {
    let mut coeffs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = line.parse::<f64>().map_err(|_| IoError::Parse {
            line: index + 1,
            text: line.to_string(),
        })?;
        coeffs.push(value);
        if max_length > 0 && coeffs.len() == max_length {
            break;
        }
    }
    Ok(coeffs)
}

/// Load a text coefficient file
pub fn load_text_coeffs(path: &Path, max_length: usize) -> Result<Vec<f64>, IoError> {
    let content = fs::read_to_string(path)?;
    parse_text_coeffs(&content, max_length)
}

/// Decode raw coefficient bytes of a single channel, normalizing integers to ±1
pub fn decode_raw_coeffs(
    raw: &[u8],
    spec: SampleSpec,
    max_length: usize,
) -> Result<Vec<f64>, IoError> {
    spec.validate()?;
    if raw.len() % spec.bytes != 0 {
        return Err(IoError::Decode(format!(
            "{} bytes of coefficients are not a whole number of {}-byte samples",
            raw.len(),
            spec.bytes
        )));
    }
    let mut count = raw.len() / spec.bytes;
    if max_length > 0 {
        count = count.min(max_length);
    }
    let mut coeffs = vec![0.0; count];
    decode(raw, &BufferLayout::contiguous(spec), &mut coeffs);

    let scale = spec.normalized_scale();
    if scale != 1.0 {
        coeffs.iter_mut().for_each(|c| *c *= scale);
    }
    Ok(coeffs)
}

/// Load a raw binary coefficient file
pub fn load_raw_coeffs(path: &Path, spec: SampleSpec, max_length: usize) -> Result<Vec<f64>, IoError> {
    let raw = fs::read(path)?;
    decode_raw_coeffs(&raw, spec, max_length)
}

/// Load a sound file as per-channel coefficients
pub fn load_sound_coeffs(path: &Path, max_length: usize) -> Result<CoeffData, IoError> {
    let buffer = if max_length > 0 {
        sound::load_frames(path, max_length, false)?
    } else {
        sound::load(path)?
    };
    Ok(CoeffData {
        channels: buffer.deinterleave(),
        sample_rate: buffer.sample_rate,
    })
}

/// Coefficients read from a sound file on demand
#[derive(Debug, Clone)]
pub struct SoundFileCoefficients {
    path: PathBuf,
}

impl SoundFileCoefficients {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CoefficientSource for SoundFileCoefficients {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn probe(&self) -> Result<(usize, u32), CoeffError> {
        let info = sound::probe(&self.path).map_err(|e| CoeffError::Load(e.to_string()))?;
        Ok((info.channels, info.sample_rate))
    }

    fn load(&self, max_frames: usize) -> Result<CoeffData, CoeffError> {
        load_sound_coeffs(&self.path, max_frames).map_err(CoeffError::from)
    }
}

/// Coefficients already held in memory
#[derive(Debug, Clone)]
pub struct BufferCoefficients {
    pub channels: Vec<Vec<f64>>,
    pub sample_rate: u32,
}

impl CoefficientSource for BufferCoefficients {
    fn describe(&self) -> String {
        format!("{}-channel buffer", self.channels.len())
    }

    fn probe(&self) -> Result<(usize, u32), CoeffError> {
        Ok((self.channels.len(), self.sample_rate))
    }

    fn load(&self, max_frames: usize) -> Result<CoeffData, CoeffError> {
        Ok(CoeffData {
            channels: self
                .channels
                .iter()
                .map(|c| c[..c.len().min(max_frames)].to_vec())
                .collect(),
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfir_engine::SampleFormat;

    #[test]
    fn test_parse_text_skips_blank_lines() {
        let coeffs = parse_text_coeffs("1.0\n\n  -0.5\n\t0.25\n", 0).unwrap();
        assert_eq!(coeffs, vec![1.0, -0.5, 0.25]);
    }

    #[test]
    fn test_parse_text_respects_max_length() {
        let coeffs = parse_text_coeffs("1\n2\n3\n4\n", 2).unwrap();
        assert_eq!(coeffs, vec![1.0, 2.0]);
    }

    #[test]
    fn test_parse_text_reports_line() {
        let err = parse_text_coeffs("1.0\n\nabc\n", 0).unwrap_err();
        assert!(matches!(err, IoError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_decode_raw_normalizes_integers() {
        let raw: Vec<u8> = [16384i16, -32768, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let coeffs = decode_raw_coeffs(&raw, SampleFormat::S16Le.spec(), 0).unwrap();
        assert_eq!(coeffs, vec![0.5, -1.0, 0.0]);

        let floats: Vec<u8> = [0.75f32, -0.125].iter().flat_map(|v| v.to_be_bytes()).collect();
        let coeffs = decode_raw_coeffs(&floats, SampleFormat::F32Be.spec(), 1).unwrap();
        assert_eq!(coeffs, vec![0.75]);
    }

    #[test]
    fn test_decode_raw_rejects_bad_sizes() {
        // Trailing byte of a 24-bit stream
        assert!(matches!(
            decode_raw_coeffs(&[0u8; 7], SampleFormat::S24Le.spec(), 0),
            Err(IoError::Decode(_))
        ));

        let mut empty = SampleFormat::S16Le.spec();
        empty.bytes = 0;
        assert!(matches!(
            decode_raw_coeffs(&[0u8; 4], empty, 0),
            Err(IoError::Engine(_))
        ));
        assert_eq!(
            decode_raw_coeffs(&[], SampleFormat::S16Le.spec(), 0).unwrap(),
            Vec::<f64>::new()
        );
    }

    #[test]
    fn test_load_text_and_raw_files() {
        let dir = std::env::temp_dir().join(format!("bfir-loaders-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let text = dir.join("coeffs.txt");
        fs::write(&text, "0.5\n0.25\n").unwrap();
        assert_eq!(load_text_coeffs(&text, 0).unwrap(), vec![0.5, 0.25]);

        let raw = dir.join("coeffs.raw");
        let bytes: Vec<u8> = [0.5f64, 0.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&raw, bytes).unwrap();
        assert_eq!(
            load_raw_coeffs(&raw, SampleFormat::F64Le.spec(), 0).unwrap(),
            vec![0.5, 0.25]
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sound_file_source() {
        let dir = std::env::temp_dir().join(format!("bfir-loaders-snd-{}", std::process::id()));
        let path = dir.join("ir.wav");
        sound::save(&path, &[1.0, 0.5, 0.0, 0.25, 0.0, 0.0], 2, 48000).unwrap();

        let source = SoundFileCoefficients::new(&path);
        assert_eq!(source.probe().unwrap(), (2, 48000));
        let data = source.load(2).unwrap();
        assert_eq!(data.channels, vec![vec![1.0, 0.0], vec![0.5, 0.25]]);

        let missing = SoundFileCoefficients::new(dir.join("missing.wav"));
        assert!(matches!(missing.probe(), Err(CoeffError::Load(_))));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_buffer_source_and_dirac() {
        let source = BufferCoefficients {
            channels: dirac_coeffs(2, 8),
            sample_rate: 44100,
        };
        assert_eq!(source.probe().unwrap(), (2, 44100));
        let data = source.load(4).unwrap();
        assert_eq!(data.channels[1], vec![1.0, 0.0, 0.0, 0.0]);
    }
}
