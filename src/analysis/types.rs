//! Analysis data structures

use crate::error::{Result, ShowError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoded mono audio ready for analysis
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    duration: f64,
}

impl AudioBuffer {
    /// Wrap mono samples; a zero sample rate is rejected
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ShowError::input("sample rate must be greater than zero"));
        }
        let duration = samples.len() as f64 / sample_rate as f64;
        Ok(Self {
            samples,
            sample_rate,
            duration,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One analysis frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencySlice {
    /// Frame start in seconds
    pub timestamp: f64,

    /// Normalized energy 20-250 Hz
    pub bass: f32,

    /// Normalized energy 250-4000 Hz
    pub mid: f32,

    /// Normalized energy 4000-20000 Hz
    pub treble: f32,

    /// Normalized overall amplitude
    pub amplitude: f32,

    /// Frequency of the strongest non-DC bin (Hz)
    pub dominant_frequency: f32,
}

impl FrequencySlice {
    /// Energy of the loudest band
    pub fn peak_band(&self) -> f32 {
        self.bass.max(self.mid).max(self.treble)
    }
}

/// Frequency band labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Bass,
    Mid,
    Treble,
}

/// Mood label derived from energy, tempo and band balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Calm,
    Energetic,
    Intense,
    Dramatic,
    Ambient,
}

impl Mood {
    pub fn name(&self) -> &'static str {
        match self {
            Mood::Calm => "calm",
            Mood::Energetic => "energetic",
            Mood::Intense => "intense",
            Mood::Dramatic => "dramatic",
            Mood::Ambient => "ambient",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complete analysis result for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Tempo in BPM
    pub tempo: f64,

    /// Beat positions in seconds, ascending
    pub beats: Vec<f64>,

    /// Analysis frames in timestamp order
    pub slices: Vec<FrequencySlice>,

    /// Mean frame amplitude
    pub energy: f32,

    pub mood: Mood,

    /// Track duration in seconds
    pub duration: f64,
}

impl AudioFeatures {
    pub fn beat_count(&self) -> usize {
        self.beats.len()
    }

    /// Band with the highest mean energy across the track
    pub fn dominant_band(&self) -> Band {
        let (bass, mid, treble) = band_means(&self.slices);
        dominant_of(bass, mid, treble)
    }

    /// Last slice at or before `time`
    pub fn slice_at(&self, time: f64) -> Option<&FrequencySlice> {
        let idx = self.slices.partition_point(|s| s.timestamp <= time);
        if idx == 0 {
            None
        } else {
            self.slices.get(idx - 1)
        }
    }

    /// Nearest beat to `time` and its distance in seconds
    pub fn nearest_beat(&self, time: f64) -> Option<(f64, f64)> {
        let idx = self.beats.partition_point(|&b| b < time);
        let after = self.beats.get(idx).copied();
        let before = idx.checked_sub(1).and_then(|i| self.beats.get(i)).copied();

        [before, after]
            .into_iter()
            .flatten()
            .map(|b| (b, (b - time).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Mean bass, mid and treble energy over a slice list
pub fn band_means(slices: &[FrequencySlice]) -> (f32, f32, f32) {
    if slices.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = slices.len() as f32;
    let (b, m, t) = slices.iter().fold((0.0, 0.0, 0.0), |acc, s| {
        (acc.0 + s.bass, acc.1 + s.mid, acc.2 + s.treble)
    });
    (b / n, m / n, t / n)
}

/// Band with the largest value; ties favour the lower band
pub fn dominant_of(bass: f32, mid: f32, treble: f32) -> Band {
    if bass >= mid && bass >= treble {
        Band::Bass
    } else if mid >= treble {
        Band::Mid
    } else {
        Band::Treble
    }
}
