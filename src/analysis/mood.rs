//! Mood classification decision table

use super::types::{dominant_of, Band, Mood};
use crate::config::MoodThresholds;

/// Classify a track from its mean amplitude, tempo and mean band energies
///
/// Rules are evaluated top-down; the first match wins.
pub fn classify_mood(
    energy: f32,
    bpm: f64,
    bass: f32,
    mid: f32,
    treble: f32,
    t: &MoodThresholds,
) -> Mood {
    let dominant = dominant_of(bass, mid, treble);

    if energy >= t.intense_energy && bpm >= t.intense_bpm {
        Mood::Intense
    } else if energy >= t.energetic_energy && bpm >= t.energetic_bpm {
        Mood::Energetic
    } else if dominant == Band::Bass && energy >= t.dramatic_energy {
        Mood::Dramatic
    } else if energy < t.ambient_energy {
        Mood::Ambient
    } else if dominant == Band::Treble && bpm < t.ambient_bpm {
        Mood::Ambient
    } else {
        Mood::Calm
    }
}
