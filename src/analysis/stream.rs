//! Progressive (chunked) analysis
//!
//! Samples arrive in arbitrary chunks. A carry-over buffer holds whatever has
//! not yet been consumed; a frame is emitted once `fft_size + hop_size`
//! samples are buffered so the next frame is guaranteed to start inside the
//! buffer. `finalize` drains the frames that only need `fft_size` samples.

use super::spectral::{FrameProcessor, SpectralAnalyzer};
use super::types::{AudioFeatures, FrequencySlice};
use crate::config::AnalysisSettings;

/// Incremental analyzer created by [`SpectralAnalyzer::stream`]
#[derive(Debug)]
pub struct StreamingAnalyzer {
    processor: FrameProcessor,
    settings: AnalysisSettings,
    carry: Vec<f32>,
    frames_emitted: usize,
    samples_seen: usize,
    slices: Vec<FrequencySlice>,
}

impl StreamingAnalyzer {
    pub(crate) fn new(processor: FrameProcessor, settings: AnalysisSettings) -> Self {
        Self {
            carry: Vec::with_capacity(settings.fft_size + settings.hop_size),
            processor,
            settings,
            frames_emitted: 0,
            samples_seen: 0,
            slices: Vec::new(),
        }
    }

    /// Append a chunk; returns the number of frames emitted by this call
    pub fn push(&mut self, chunk: &[f32]) -> usize {
        self.samples_seen += chunk.len();
        self.carry.extend_from_slice(chunk);

        let needed = self.settings.fft_size + self.settings.hop_size;
        let before = self.slices.len();
        while self.carry.len() >= needed {
            self.emit_frame();
        }
        self.slices.len() - before
    }

    /// Slices emitted so far
    pub fn slices(&self) -> &[FrequencySlice] {
        &self.slices
    }

    /// Seconds of audio pushed so far
    pub fn duration(&self) -> f64 {
        self.samples_seen as f64 / self.processor.sample_rate() as f64
    }

    /// Drain remaining complete frames and build the final features
    pub fn finalize(mut self) -> AudioFeatures {
        while self.carry.len() >= self.settings.fft_size {
            self.emit_frame();
        }
        let duration = self.duration();
        SpectralAnalyzer::summarize(&self.settings, self.slices, duration)
    }

    fn emit_frame(&mut self) {
        let fft_size = self.processor.fft_size();
        let hop = self.settings.hop_size;
        let timestamp =
            (self.frames_emitted * hop) as f64 / self.processor.sample_rate() as f64;

        let slice = self.processor.process(&self.carry[..fft_size], timestamp);
        self.slices.push(slice);
        self.frames_emitted += 1;

        let drop = hop.min(self.carry.len());
        self.carry.drain(..drop);
    }
}
