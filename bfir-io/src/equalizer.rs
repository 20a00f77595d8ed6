//! Linear-phase equalizer rendering
//!
//! Band gains are interpolated across the spectrum with half-cosine
//! segments, given a linear phase of half the filter length, and transformed
//! back to time to produce a coefficient file.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bfir_engine::transform::{Direction, Placement, PlanCache};
use bfir_engine::{log2_exact, BufferedSink, EngineError, Precision, Real};

use crate::error::IoError;
use crate::sound;

/// ISO 1/3-octave band centres in Hz
pub const ISO_BANDS: [f64; 31] = [
    20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0,
    500.0, 630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0,
    8000.0, 10000.0, 12500.0, 16000.0, 20000.0,
];

/// One equalizer band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub freq: f64,
    pub gain_db: f64,
    pub phase_deg: f64,
}

impl Band {
    pub fn new(freq: f64, gain_db: f64) -> Self {
        Self {
            freq,
            gain_db,
            phase_deg: 0.0,
        }
    }

    /// Parse `freq:dB` or `freq:dB:degrees`
    pub fn parse(text: &str) -> Result<Self, IoError> {
        let invalid = || IoError::Parse {
            line: 1,
            text: text.to_string(),
        };
        let fields: Vec<f64> = text
            .split(':')
            .map(|f| f.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;
        match fields.as_slice() {
            [freq, gain_db] => Ok(Self::new(*freq, *gain_db)),
            [freq, gain_db, phase_deg] => Ok(Self {
                freq: *freq,
                gain_db: *gain_db,
                phase_deg: *phase_deg,
            }),
            _ => Err(invalid()),
        }
    }
}

/// Equalizer for one filter shape and sample rate
#[derive(Debug, Clone)]
pub struct Equalizer {
    taps: usize,
    precision: Precision,
    channels: usize,
    sample_rate: u32,
    /// Grid frequencies in Hz, 0 and Nyquist included
    grid: Vec<f64>,
}

impl Equalizer {
    pub fn new(
        block_length: usize,
        n_blocks: usize,
        precision: Precision,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, IoError> {
        let taps = block_length * n_blocks;
        if log2_exact(taps).is_none() || taps < 2 {
            return Err(IoError::Incompatible(format!(
                "equalizer length {} x {} is not a power of two",
                block_length, n_blocks
            )));
        }

        let nyquist = sample_rate as f64 / 2.0;
        let mut grid = vec![0.0];
        grid.extend(ISO_BANDS.iter().copied().filter(|&f| f < nyquist));
        grid.push(nyquist);

        Ok(Self {
            taps,
            precision,
            channels,
            sample_rate,
            grid,
        })
    }

    /// Coefficients produced per channel
    pub fn length(&self) -> usize {
        self.taps / 2
    }

    /// Snap `bands` onto the grid and return per-grid-point gain (linear)
    /// and phase (radians)
    fn grid_response(&self, bands: &[Band]) -> Result<(Vec<f64>, Vec<f64>), IoError> {
        let count = self.grid.len();
        if bands.len() > count - 2 {
            return Err(IoError::Incompatible(format!(
                "{} bands exceed the limit of {}",
                bands.len(),
                count - 2
            )));
        }

        let mut gain_db = vec![0.0; count];
        let mut phase_deg = vec![0.0; count];
        let mut i = 0;
        for band in bands {
            while i < count - 1 && band.freq > self.grid[i] {
                i += 1;
            }
            gain_db[i] = band.gain_db;
            phase_deg[i] = band.phase_deg;
            i += 1;
            if i >= count {
                break;
            }
        }
        gain_db[0] = gain_db[1];
        gain_db[count - 1] = gain_db[count - 2];

        let mag = gain_db.iter().map(|&db| 10f64.powf(db / 20.0)).collect();
        let phase = phase_deg.iter().map(|&deg| deg.to_radians()).collect();
        Ok((mag, phase))
    }

    /// Render `bands` (sorted by frequency) into `taps / 2` coefficients
    pub fn render(&self, bands: &[Band]) -> Result<Vec<f64>, IoError> {
        let (mag, phase) = self.grid_response(bands)?;
        let freq: Vec<f64> = self.grid.iter().map(|f| f / self.sample_rate as f64).collect();
        match self.precision {
            Precision::Single => self.render_with::<f32>(&freq, &mag, &phase),
            Precision::Double => self.render_with::<f64>(&freq, &mag, &phase),
        }
    }

    fn render_with<T: Real>(
        &self,
        freq: &[f64],
        mag: &[f64],
        phase: &[f64],
    ) -> Result<Vec<f64>, IoError> {
        let taps = self.taps;
        let half = taps / 2;
        let last = freq.len() - 1;
        let scale = 1.0 / taps as f64;
        let delay = -(taps as f64) * PI;

        let mut spectrum = vec![T::ZERO; taps];
        spectrum[0] = T::of(mag[0] * scale);
        let mut i = 0;
        for n in 1..half {
            let f = n as f64 / taps as f64;
            while i + 1 < last && f > freq[i + 1] {
                i += 1;
            }
            let m = cosine_interpolate(mag[i], mag[i + 1], freq[i], freq[i + 1], f) * scale;
            let rad =
                delay * f + cosine_interpolate(phase[i], phase[i + 1], freq[i], freq[i + 1], f);
            spectrum[n] = T::of(rad.cos() * m);
            spectrum[taps - n] = T::of(rad.sin() * m);
        }
        spectrum[half] = T::of(mag[last] * scale);

        let mut plans = PlanCache::<T>::new(Arc::new(BufferedSink::new()));
        plans
            .plan(Direction::Inverse, Placement::InPlace, taps.trailing_zeros())
            .and_then(|plan| plan.execute(&mut spectrum))
            .map_err(EngineError::from)?;

        Ok(spectrum[half..].iter().map(|v| v.as_f64()).collect())
    }

    /// File name for a band set, unique per bands and equalizer shape
    pub fn file_name(&self, bands: &[Band]) -> String {
        let mut bytes = Vec::with_capacity(bands.len() * 24);
        for band in bands {
            bytes.extend_from_slice(&band.freq.to_le_bytes());
        }
        for band in bands {
            bytes.extend_from_slice(&band.gain_db.to_le_bytes());
        }
        for band in bands {
            bytes.extend_from_slice(&band.phase_deg.to_le_bytes());
        }
        format!(
            "eq-{:x}-{}-{}-{}-{}.wav",
            crate::preconvolve::djb_hash(&bytes),
            self.length(),
            self.precision.realsize(),
            self.channels,
            self.sample_rate
        )
    }

    /// Render `bands` to a sound file in `out_dir`, reusing an existing one
    pub fn generate(&self, bands: &[Band], out_dir: &Path) -> Result<PathBuf, IoError> {
        let path = out_dir.join(self.file_name(bands));
        if path.exists() {
            tracing::debug!("Using cached equalizer {}", path.display());
            return Ok(path);
        }

        let coeffs = self.render(bands)?;
        let channels: Vec<&[f64]> = (0..self.channels).map(|_| coeffs.as_slice()).collect();
        sound::save(&path, &sound::interleave(&channels), self.channels, self.sample_rate)?;
        tracing::info!("Rendered {} equalizer bands to {}", bands.len(), path.display());
        Ok(path)
    }
}

fn cosine_interpolate(mag1: f64, mag2: f64, freq1: f64, freq2: f64, f: f64) -> f64 {
    (mag1 - mag2) * 0.5 * (PI * (f - freq1) / (freq2 - freq1)).cos() + (mag1 + mag2) * 0.5
}
