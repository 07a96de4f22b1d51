//! Spectral analyzer: frame windowing, FFT and band energies

use super::beats::{detect_beats, estimate_tempo};
use super::fft::{hamming_window, Radix2Fft};
use super::mood::classify_mood;
use super::stream::StreamingAnalyzer;
use super::types::{band_means, AudioBuffer, AudioFeatures, FrequencySlice};
use crate::config::AnalysisSettings;
use crate::error::{Result, ShowError};
use num_complex::Complex32;
use std::ops::Range;
use std::sync::Arc;

/// Bass band edges (Hz)
const BASS_HZ: (f32, f32) = (20.0, 250.0);
/// Mid band edges (Hz)
const MID_HZ: (f32, f32) = (250.0, 4000.0);
/// Treble band edges (Hz)
const TREBLE_HZ: (f32, f32) = (4000.0, 20000.0);

/// Whole-buffer and streaming spectral analysis
///
/// The FFT plan and Hamming window are built once here and shared by every
/// stream created from this analyzer.
#[derive(Debug, Clone)]
pub struct SpectralAnalyzer {
    settings: AnalysisSettings,
    fft: Arc<Radix2Fft>,
    window: Arc<[f32]>,
}

impl SpectralAnalyzer {
    /// Create an analyzer; rejects non-power-of-two FFT sizes and zero hops
    pub fn new(settings: AnalysisSettings) -> Result<Self> {
        if settings.hop_size == 0 {
            return Err(ShowError::input("hop size must be greater than zero"));
        }
        let fft = Radix2Fft::new(settings.fft_size)?;
        let window: Arc<[f32]> = hamming_window(settings.fft_size).into();

        Ok(Self {
            settings,
            fft: Arc::new(fft),
            window,
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Analyze a complete buffer
    pub fn analyze(&self, buffer: &AudioBuffer) -> Result<AudioFeatures> {
        log::debug!(
            "Analyzing {} samples ({:.1}s) at {}Hz, fft={} hop={}",
            buffer.len(),
            buffer.duration(),
            buffer.sample_rate(),
            self.settings.fft_size,
            self.settings.hop_size
        );

        let mut stream = self.stream(buffer.sample_rate())?;
        stream.push(buffer.samples());
        let features = stream.finalize();

        log::info!(
            "Analysis complete: {} slices, {} beats, {:.1} BPM, mood={}",
            features.slices.len(),
            features.beats.len(),
            features.tempo,
            features.mood
        );
        Ok(features)
    }

    /// Start a progressive analysis for audio at `sample_rate`
    pub fn stream(&self, sample_rate: u32) -> Result<StreamingAnalyzer> {
        if sample_rate == 0 {
            return Err(ShowError::input("sample rate must be greater than zero"));
        }
        let processor = FrameProcessor::new(
            self.fft.clone(),
            self.window.clone(),
            sample_rate,
            self.settings.band_scale,
            self.settings.amplitude_scale,
        );
        Ok(StreamingAnalyzer::new(
            processor,
            self.settings.clone(),
        ))
    }

    /// Build features from a finished slice list
    pub(crate) fn summarize(
        settings: &AnalysisSettings,
        slices: Vec<FrequencySlice>,
        duration: f64,
    ) -> AudioFeatures {
        let beats = detect_beats(&slices, &settings.beat);
        let tempo = estimate_tempo(&beats, &settings.beat);

        let energy = if slices.is_empty() {
            0.0
        } else {
            slices.iter().map(|s| s.amplitude).sum::<f32>() / slices.len() as f32
        };
        let (bass, mid, treble) = band_means(&slices);
        let mood = classify_mood(energy, tempo, bass, mid, treble, &settings.mood);

        AudioFeatures {
            tempo,
            beats,
            slices,
            energy,
            mood,
            duration,
        }
    }
}

/// Turns one window of samples into a [`FrequencySlice`]
#[derive(Debug)]
pub struct FrameProcessor {
    fft: Arc<Radix2Fft>,
    window: Arc<[f32]>,
    scratch: Vec<Complex32>,
    sample_rate: u32,
    bin_width: f32,
    bass: Range<usize>,
    mid: Range<usize>,
    treble: Range<usize>,
    band_scale: f32,
    amplitude_scale: f32,
}

impl FrameProcessor {
    fn new(
        fft: Arc<Radix2Fft>,
        window: Arc<[f32]>,
        sample_rate: u32,
        band_scale: f32,
        amplitude_scale: f32,
    ) -> Self {
        let size = fft.size();
        let num_bins = size / 2;
        let bin_width = (sample_rate as f32 / 2.0) / num_bins as f32;

        Self {
            scratch: vec![Complex32::new(0.0, 0.0); size],
            bass: band_bins(BASS_HZ, bin_width, num_bins),
            mid: band_bins(MID_HZ, bin_width, num_bins),
            treble: band_bins(TREBLE_HZ, bin_width, num_bins),
            fft,
            window,
            sample_rate,
            bin_width,
            band_scale,
            amplitude_scale,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft.size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Analyze exactly `fft_size` samples starting at `timestamp`
    pub fn process(&mut self, frame: &[f32], timestamp: f64) -> FrequencySlice {
        debug_assert_eq!(frame.len(), self.fft.size());

        for ((slot, &sample), &w) in self.scratch.iter_mut().zip(frame).zip(self.window.iter()) {
            *slot = Complex32::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let num_bins = self.fft.size() / 2;
        let norm = num_bins as f32;

        let mut total_sq = 0.0f32;
        let mut bass_sq = 0.0f32;
        let mut mid_sq = 0.0f32;
        let mut treble_sq = 0.0f32;
        let mut peak_bin = 0usize;
        let mut peak_mag = 0.0f32;

        for (bin, value) in self.scratch[..num_bins].iter().enumerate() {
            let mag = value.norm() / norm;
            let sq = mag * mag;
            total_sq += sq;

            if self.bass.contains(&bin) {
                bass_sq += sq;
            } else if self.mid.contains(&bin) {
                mid_sq += sq;
            } else if self.treble.contains(&bin) {
                treble_sq += sq;
            }

            if bin > 0 && mag > peak_mag {
                peak_mag = mag;
                peak_bin = bin;
            }
        }

        let scale = |sq: f32, k: f32| (sq.sqrt() * k).clamp(0.0, 1.0);

        FrequencySlice {
            timestamp,
            bass: scale(bass_sq, self.band_scale),
            mid: scale(mid_sq, self.band_scale),
            treble: scale(treble_sq, self.band_scale),
            amplitude: scale(total_sq, self.amplitude_scale),
            dominant_frequency: peak_bin as f32 * self.bin_width,
        }
    }
}

/// Bins whose centre frequency lies in `[lo, hi)`
fn band_bins((lo, hi): (f32, f32), bin_width: f32, num_bins: usize) -> Range<usize> {
    let start = ((lo / bin_width).ceil() as usize).min(num_bins);
    let end = ((hi / bin_width).ceil() as usize).min(num_bins);
    start..end.max(start)
}
