//! Per-channel clip and peak tracking

use std::fmt;

/// Running clip statistics for one output channel
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Overflow {
    /// Samples that exceeded the representable range
    pub clipped: u32,
    /// Largest excursion among clipped samples (or any float sample)
    pub largest: f64,
    /// Largest integer magnitude written without clipping
    pub int_largest: u32,
    /// Largest representable magnitude of the output format
    pub max: f64,
}

impl Overflow {
    pub fn new(max: f64) -> Self {
        Self {
            max,
            ..Default::default()
        }
    }

    /// Zero the counters, keep `max`
    pub fn reset(&mut self) {
        *self = Self::new(self.max);
    }

    pub fn peak(&self) -> f64 {
        self.largest.max(self.int_largest as f64)
    }

    /// Peak relative to full scale in dB, `None` for silence
    pub fn peak_db(&self) -> Option<f64> {
        let peak = self.peak();
        if peak == 0.0 || self.max == 0.0 {
            return None;
        }
        let db = 20.0 * (peak / self.max).log10();
        // A peak reaching exactly full scale reads as non-positive
        Some(if db == 0.0 { -0.0 } else { db })
    }

    /// Count a clipped sample of value `value`
    #[inline(always)]
    pub fn record_clip(&mut self, value: f64) {
        self.clipped += 1;
        if value.abs() > self.largest {
            self.largest = value.abs();
        }
    }

    /// Track the magnitude of an integer written in range
    #[inline(always)]
    pub fn record_int(&mut self, sample: i32) {
        self.int_largest = self.int_largest.max(sample.unsigned_abs());
    }

    /// Float-domain range check used by float encoders
    #[inline(always)]
    pub fn update_real(&mut self, value: f64) {
        if value < 0.0 {
            if value < -self.max {
                self.clipped += 1;
            }
            if value < -self.largest {
                self.largest = -value;
            }
        } else {
            if value > self.max {
                self.clipped += 1;
            }
            if value > self.largest {
                self.largest = value;
            }
        }
    }
}

/// One line of an overflow report
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPeak {
    pub channel: usize,
    pub clipped: u32,
    /// `None` when the channel was silent
    pub peak_db: Option<f64>,
}

impl fmt::Display for ChannelPeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peak_db {
            Some(db) => write!(f, "peak: {}/{}/{:+.2}", self.channel, self.clipped, db),
            None => write!(f, "peak: {}/{}/-Inf", self.channel, self.clipped),
        }
    }
}

/// Consolidated report across all channels
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverflowReport {
    pub channels: Vec<ChannelPeak>,
}

impl OverflowReport {
    pub fn from_records(records: &[Overflow]) -> Self {
        Self {
            channels: records
                .iter()
                .enumerate()
                .map(|(channel, of)| ChannelPeak {
                    channel,
                    clipped: of.clipped,
                    peak_db: of.peak_db(),
                })
                .collect(),
        }
    }

    pub fn total_clipped(&self) -> u64 {
        self.channels.iter().map(|c| c.clipped as u64).sum()
    }
}

impl fmt::Display for OverflowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, channel) in self.channels.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", channel)?;
        }
        Ok(())
    }
}

/// Current records plus the snapshot last reported
#[derive(Debug, Clone)]
pub struct OverflowTracker {
    current: Vec<Overflow>,
    reported: Vec<Overflow>,
}

impl OverflowTracker {
    /// One record per channel, each with its format's maximum
    pub fn new(max_values: &[f64]) -> Self {
        let current: Vec<Overflow> = max_values.iter().map(|&m| Overflow::new(m)).collect();
        Self {
            reported: current.clone(),
            current,
        }
    }

    pub fn records(&self) -> &[Overflow] {
        &self.current
    }

    pub fn record_mut(&mut self, channel: usize) -> &mut Overflow {
        &mut self.current[channel]
    }

    pub fn reset(&mut self) {
        for of in self.current.iter_mut().chain(self.reported.iter_mut()) {
            of.reset();
        }
    }

    /// Snapshot on change; report only once some channel has clipped
    pub fn check(&mut self) -> Option<OverflowReport> {
        if self.current == self.reported {
            return None;
        }
        self.reported.copy_from_slice(&self.current);
        if self.current.iter().all(|of| of.clipped == 0) {
            return None;
        }
        Some(OverflowReport::from_records(&self.current))
    }
}
