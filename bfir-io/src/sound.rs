//! Sound file probing, decoding and writing

use std::path::Path;

use bfir_engine::SampleFormat;
use rand::Rng;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::IoError;

/// Shape of a sound file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundInfo {
    pub channels: usize,
    pub frames: usize,
    pub sample_rate: u32,
}

/// Decoded sound file
#[derive(Debug, Clone)]
pub struct SoundBuffer {
    /// Interleaved samples in the ±1 range
    pub samples: Vec<f64>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl SoundBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn info(&self) -> SoundInfo {
        SoundInfo {
            channels: self.channels,
            frames: self.frames(),
            sample_rate: self.sample_rate,
        }
    }

    /// One buffer per channel
    pub fn deinterleave(&self) -> Vec<Vec<f64>> {
        deinterleave(&self.samples, self.channels)
    }
}

struct OpenTrack {
    format: Box<dyn FormatReader>,
    track_id: u32,
    params: CodecParameters,
    channels: usize,
    sample_rate: u32,
}

fn open(path: &Path) -> Result<OpenTrack, IoError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| IoError::Decode(e.to_string()))?;

    let format = probed.format;
    let (track_id, params) = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| (t.id, t.codec_params.clone()))
        .ok_or(IoError::NoAudioTrack)?;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| IoError::Decode("unknown sample rate".to_string()))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| IoError::Decode("unknown channel layout".to_string()))?;

    Ok(OpenTrack {
        format,
        track_id,
        params,
        channels,
        sample_rate,
    })
}

/// Decode every packet of the track, stopping once `max_frames` frames are in
fn decode_all(track: &mut OpenTrack, max_frames: Option<usize>) -> Result<Vec<f64>, IoError> {
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.params, &DecoderOptions::default())
        .map_err(|e| IoError::Decode(e.to_string()))?;

    let limit = max_frames.map(|f| f * track.channels);
    let mut samples: Vec<f64> = Vec::new();

    loop {
        if limit.is_some_and(|l| samples.len() >= l) {
            break;
        }

        let packet = match track.format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                tracing::debug!("Stopping decode: {}", e);
                break;
            }
        };

        if packet.track_id() != track.track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
        };

        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;
        let mut sample_buf = SampleBuffer::<f64>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if let Some(l) = limit {
        samples.truncate(l);
    }
    Ok(samples)
}

/// Channel count, frame count and sample rate of a sound file
pub fn probe(path: &Path) -> Result<SoundInfo, IoError> {
    let mut track = open(path)?;
    let frames = match track.params.n_frames {
        Some(n) => n as usize,
        // Some containers only know their length after a full decode
        None => decode_all(&mut track, None)?.len() / track.channels,
    };
    Ok(SoundInfo {
        channels: track.channels,
        frames,
        sample_rate: track.sample_rate,
    })
}

/// Decode a whole sound file to interleaved samples
pub fn load(path: &Path) -> Result<SoundBuffer, IoError> {
    let mut track = open(path)?;
    let samples = decode_all(&mut track, None)?;
    tracing::debug!(
        "Loaded {}: {} channels, {} frames, {} Hz",
        path.display(),
        track.channels,
        samples.len() / track.channels.max(1),
        track.sample_rate
    );
    Ok(SoundBuffer {
        samples,
        channels: track.channels,
        sample_rate: track.sample_rate,
    })
}

/// Decode at most `max_frames` frames, zero-padding up to `max_frames` when `pad` is set
pub fn load_frames(path: &Path, max_frames: usize, pad: bool) -> Result<SoundBuffer, IoError> {
    let mut track = open(path)?;
    let mut samples = decode_all(&mut track, Some(max_frames))?;
    if pad {
        samples.resize(max_frames * track.channels, 0.0);
    }
    Ok(SoundBuffer {
        samples,
        channels: track.channels,
        sample_rate: track.sample_rate,
    })
}

/// Write interleaved samples as a 32-bit float WAV file
pub fn save(path: &Path, samples: &[f64], channels: usize, sample_rate: u32) -> Result<(), IoError> {
    let spec = hound::WavSpec {
        channels: wav_channels(channels)?,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    create_parent(path)?;
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s as f32)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write raw little-endian sample bytes to a WAV file of the same format
pub fn save_encoded(
    path: &Path,
    raw: &[u8],
    format: SampleFormat,
    channels: usize,
    sample_rate: u32,
) -> Result<(), IoError> {
    let (bits, sample_format) = match format {
        SampleFormat::S16Le => (16, hound::SampleFormat::Int),
        SampleFormat::S24Le => (24, hound::SampleFormat::Int),
        SampleFormat::S32Le => (32, hound::SampleFormat::Int),
        SampleFormat::F32Le => (32, hound::SampleFormat::Float),
        other => {
            return Err(IoError::Encode(format!(
                "{} cannot be stored in a WAV file",
                other.name()
            )))
        }
    };
    let spec = hound::WavSpec {
        channels: wav_channels(channels)?,
        sample_rate,
        bits_per_sample: bits,
        sample_format,
    };
    create_parent(path)?;
    let mut writer = hound::WavWriter::create(path, spec)?;
    match format {
        SampleFormat::S16Le => {
            for w in raw.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([w[0], w[1]]))?;
            }
        }
        SampleFormat::S24Le => {
            for w in raw.chunks_exact(3) {
                writer.write_sample(i32::from_le_bytes([0, w[0], w[1], w[2]]) >> 8)?;
            }
        }
        SampleFormat::S32Le => {
            for w in raw.chunks_exact(4) {
                writer.write_sample(i32::from_le_bytes([w[0], w[1], w[2], w[3]]))?;
            }
        }
        _ => {
            for w in raw.chunks_exact(4) {
                writer.write_sample(f32::from_le_bytes([w[0], w[1], w[2], w[3]]))?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

fn wav_channels(channels: usize) -> Result<u16, IoError> {
    u16::try_from(channels)
        .ok()
        .filter(|&c| c > 0)
        .ok_or_else(|| IoError::Encode(format!("invalid channel count {}", channels)))
}

fn create_parent(path: &Path) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Split interleaved samples into one buffer per channel
pub fn deinterleave(samples: &[f64], channels: usize) -> Vec<Vec<f64>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channels;
    (0..channels)
        .map(|ch| (0..frames).map(|f| samples[f * channels + ch]).collect())
        .collect()
}

/// Merge per-channel buffers into one interleaved buffer, truncating to the shortest
pub fn interleave<C: AsRef<[f64]>>(buffers: &[C]) -> Vec<f64> {
    let frames = buffers.iter().map(|b| b.as_ref().len()).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * buffers.len());
    for f in 0..frames {
        for buffer in buffers {
            out.push(buffer.as_ref()[f]);
        }
    }
    out
}

/// Uniform noise in [-1, 1), interleaved
pub fn white_noise<R: Rng>(channels: usize, frames: usize, rng: &mut R) -> Vec<f64> {
    (0..channels * frames).map(|_| rng.gen_range(-1.0..1.0)).collect()
}
