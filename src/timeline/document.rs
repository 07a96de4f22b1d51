//! Versioned JSON export and import of rendered timelines

use crate::error::{Result, ShowError};
use crate::model::RenderTimeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current document format version
pub const DOCUMENT_VERSION: u32 = 1;

/// On-disk wrapper around a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub timeline: RenderTimeline,
}

/// Serialize a timeline to a pretty-printed JSON document
pub fn export_timeline(timeline: &RenderTimeline) -> Result<String> {
    let document = TimelineDocument {
        version: DOCUMENT_VERSION,
        exported_at: Utc::now(),
        timeline: timeline.clone(),
    };
    serde_json::to_string_pretty(&document)
        .map_err(|e| ShowError::Resource(anyhow::Error::new(e).context("Failed to serialize timeline")))
}

/// Parse and validate a document produced by [`export_timeline`]
pub fn import_timeline(json: &str) -> Result<RenderTimeline> {
    let document: TimelineDocument = serde_json::from_str(json)
        .map_err(|e| ShowError::input(format!("invalid timeline document: {}", e)))?;

    if document.version != DOCUMENT_VERSION {
        return Err(ShowError::input(format!(
            "unsupported timeline document version {} (expected {})",
            document.version, DOCUMENT_VERSION
        )));
    }
    validate(&document.timeline)?;

    log::debug!(
        "Imported timeline {} ({} tracks, {} commands)",
        document.timeline.id,
        document.timeline.tracks.len(),
        document.timeline.command_count()
    );
    Ok(document.timeline)
}

fn validate(timeline: &RenderTimeline) -> Result<()> {
    if !timeline.duration.is_finite() || timeline.duration <= 0.0 {
        return Err(ShowError::input("timeline duration must be positive"));
    }
    for track in &timeline.tracks {
        let bad = track.commands.iter().find(|c| {
            !c.timestamp.is_finite()
                || c.timestamp < 0.0
                || c.original_timestamp.is_some_and(|t| !t.is_finite())
        });
        if let Some(cmd) = bad {
            return Err(ShowError::input(format!(
                "track {} has an invalid timestamp {}",
                track.device_id, cmd.timestamp
            )));
        }
        if !track.is_ordered() {
            return Err(ShowError::input(format!(
                "track {} is not in timestamp order",
                track.device_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AudioFeatures, FrequencySlice, Mood};
    use crate::config::RenderSettings;
    use crate::model::{CommandParams, CommandType, DeviceTrack, RenderMetadata, TimedCommand};
    use std::collections::BTreeMap;

    fn sample() -> RenderTimeline {
        let mut track = DeviceTrack::new("light.a", "Lamp A");
        track.compensation_ms = 133.33333333333334;
        let mut shifted = TimedCommand::new(
            0.1 + 0.2,
            CommandType::SetColor,
            CommandParams {
                rgb: Some([1, 2, 3]),
                brightness: Some(77),
                transition: Some(1.0 / 3.0),
                ..Default::default()
            },
        );
        shifted.original_timestamp = Some(0.43333333333333335);
        track.commands = vec![
            TimedCommand::turn_on(0.0),
            shifted,
            TimedCommand::new(
                0.3,
                CommandType::Effect,
                CommandParams {
                    effect: Some("Strobe".into()),
                    ..Default::default()
                },
            ),
            TimedCommand::turn_off(61.123456789),
        ];

        RenderTimeline {
            id: "abc".into(),
            name: "song".into(),
            audio_ref: "/music/song.flac".into(),
            features: AudioFeatures {
                tempo: 123.456,
                beats: vec![0.5, 1.0000000000000002],
                slices: vec![FrequencySlice {
                    timestamp: 0.011609977324263039,
                    bass: 0.1,
                    mid: 0.30000001,
                    treble: 0.7,
                    amplitude: 0.9,
                    dominant_frequency: 86.13281,
                }],
                energy: 0.9,
                mood: Mood::Energetic,
                duration: 61.123456789,
            },
            duration: 61.123456789,
            tracks: vec![track],
            metadata: RenderMetadata {
                settings: RenderSettings::default(),
                device_count: 1,
                command_count: 4,
                processing_time_ms: 12.5,
                generated_at: Utc::now(),
                compensation: BTreeMap::from([("light.a".to_string(), 133.33333333333334)]),
                optimized_removed: 0,
            },
        }
    }

    #[test]
    fn test_export_import_exact() {
        let timeline = sample();
        let json = export_timeline(&timeline).unwrap();
        let back = import_timeline(&json).unwrap();
        assert_eq!(back, timeline);
        assert_eq!(back.tracks[0].commands[1].timestamp, 0.1 + 0.2);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(matches!(import_timeline("not json"), Err(ShowError::Input(_))));

        let mut doc: serde_json::Value =
            serde_json::from_str(&export_timeline(&sample()).unwrap()).unwrap();
        doc["version"] = serde_json::json!(99);
        assert!(import_timeline(&doc.to_string()).is_err());

        let mut unordered = sample();
        unordered.tracks[0].commands.swap(0, 3);
        let json = export_timeline(&unordered).unwrap();
        assert!(import_timeline(&json).is_err());

        let mut negative = sample();
        negative.tracks[0].commands[0].timestamp = -1.0;
        let json = export_timeline(&negative).unwrap();
        assert!(import_timeline(&json).is_err());
    }
}
