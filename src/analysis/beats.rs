//! Onset-based beat detection and tempo estimation

use super::types::FrequencySlice;
use crate::config::BeatSettings;

/// Onset strength per slice: positive bass flux plus weighted mid flux
pub fn onset_strength(slices: &[FrequencySlice], mid_weight: f32) -> Vec<f32> {
    let mut onsets = Vec::with_capacity(slices.len());
    if slices.is_empty() {
        return onsets;
    }
    onsets.push(0.0);
    for pair in slices.windows(2) {
        let d_bass = pair[1].bass - pair[0].bass;
        let d_mid = pair[1].mid - pair[0].mid;
        onsets.push((d_bass + mid_weight * d_mid).max(0.0));
    }
    onsets
}

/// Beat timestamps: local onset maxima above the adaptive threshold,
/// spaced at least `min_interval` apart
pub fn detect_beats(slices: &[FrequencySlice], settings: &BeatSettings) -> Vec<f64> {
    let onsets = onset_strength(slices, settings.mid_weight);
    if onsets.len() < 3 {
        return Vec::new();
    }

    let mean = onsets.iter().sum::<f32>() / onsets.len() as f32;
    let threshold = settings.threshold_ratio * mean;

    let mut beats: Vec<f64> = Vec::new();
    for i in 1..onsets.len() - 1 {
        let value = onsets[i];
        let is_peak = value > onsets[i - 1] && value >= onsets[i + 1];
        if !is_peak || value <= threshold {
            continue;
        }

        let time = slices[i].timestamp;
        let spaced = beats
            .last()
            .map(|&last| time - last >= settings.min_interval)
            .unwrap_or(true);
        if spaced {
            beats.push(time);
        }
    }

    log::debug!(
        "Beat detection: {} beats from {} frames (threshold {:.4})",
        beats.len(),
        onsets.len(),
        threshold
    );
    beats
}

/// Tempo from the median inter-beat interval, clamped to the BPM range
pub fn estimate_tempo(beats: &[f64], settings: &BeatSettings) -> f64 {
    if beats.len() < 2 {
        return settings.default_bpm;
    }

    let mut intervals: Vec<f64> = beats
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .collect();
    if intervals.is_empty() {
        return settings.default_bpm;
    }
    intervals.sort_by(|a, b| a.total_cmp(b));

    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };

    (60.0 / median).clamp(settings.min_bpm, settings.max_bpm)
}
