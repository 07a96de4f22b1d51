//! Slice → color, color temperature and brightness mappings

use crate::analysis::{FrequencySlice, Mood};

/// Frequency mapping: bass drives red, mid green, treble blue
pub fn frequency_color(slice: &FrequencySlice, intensity: f64) -> [u8; 3] {
    [slice.bass, slice.mid, slice.treble].map(|band| channel(band as f64 * intensity))
}

/// Base hue (degrees) for each mood
pub fn mood_hue(mood: Mood) -> f64 {
    match mood {
        Mood::Calm => 210.0,
        Mood::Energetic => 30.0,
        Mood::Intense => 0.0,
        Mood::Dramatic => 275.0,
        Mood::Ambient => 170.0,
    }
}

/// Mood mapping: the mood picks the hue, treble shifts it, loudness sets lightness
pub fn mood_color(mood: Mood, slice: &FrequencySlice, intensity: f64) -> [u8; 3] {
    let hue = (mood_hue(mood) + slice.treble as f64 * 40.0) % 360.0;
    let saturation = match mood {
        Mood::Calm | Mood::Ambient => 0.6,
        _ => 0.9,
    };
    let lightness = 0.1 + 0.4 * (slice.amplitude as f64 * intensity).clamp(0.0, 1.0);
    hsl_to_rgb(hue, saturation, lightness)
}

/// HSL (hue in degrees, s and l in [0,1]) to RGB
pub fn hsl_to_rgb(hue: f64, saturation: f64, lightness: f64) -> [u8; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let s = saturation.clamp(0.0, 1.0);
    let l = lightness.clamp(0.0, 1.0);

    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    [r, g, b].map(|v| channel(v + m))
}

/// Pull a color toward its grey level by the device's color accuracy
///
/// An accuracy of 1 leaves the color untouched.
pub fn damp_color(rgb: [u8; 3], accuracy: f64) -> [u8; 3] {
    let accuracy = accuracy.clamp(0.0, 1.0);
    let grey = rgb.iter().map(|&c| c as f64).sum::<f64>() / 3.0;
    rgb.map(|c| (grey + (c as f64 - grey) * accuracy).round().clamp(0.0, 255.0) as u8)
}

/// Color temperature from the treble share: more treble, cooler light
pub fn mireds_for(slice: &FrequencySlice, (min_mireds, max_mireds): (u32, u32)) -> u32 {
    let total = slice.bass + slice.treble;
    let ratio = if total > 0.0 {
        (slice.treble / total) as f64
    } else {
        0.5
    };
    let span = max_mireds.saturating_sub(min_mireds) as f64;
    (max_mireds as f64 - ratio * span).round() as u32
}

fn channel(value: f64) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Brightness correction applied after mapping
pub trait BrightnessCurve: Send + Sync {
    fn apply(&self, brightness: u8) -> u8;
}

/// Leaves brightness unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearCurve;

impl BrightnessCurve for LinearCurve {
    fn apply(&self, brightness: u8) -> u8 {
        brightness
    }
}

/// Power-law correction, `out = 255 · (in/255)^gamma`
#[derive(Debug, Clone, Copy)]
pub struct GammaCurve {
    pub gamma: f64,
}

impl BrightnessCurve for GammaCurve {
    fn apply(&self, brightness: u8) -> u8 {
        let normalized = brightness as f64 / 255.0;
        channel(normalized.powf(self.gamma))
    }
}
