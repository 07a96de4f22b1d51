//! Timeline and device records on top of a [`ShowStore`]
//!
//! A saved timeline is split into a summary record, its beat and slice child
//! records, and the full exported document. The summary is written last, so a
//! timeline only shows up in listings once all of its parts are stored.

use super::ShowStore;
use crate::analysis::Mood;
use crate::model::{DeviceProfile, LightDevice, ProfileBook, RenderTimeline};
use crate::timeline::{export_timeline, import_timeline};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const TIMELINE: &str = "timeline/";
const BEATS: &str = "timeline-beats/";
const SLICES: &str = "timeline-slices/";
const DOCUMENT: &str = "timeline-doc/";
const DEVICE: &str = "device/";

/// Summary of a stored timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRecord {
    pub id: String,
    pub name: String,
    pub audio_ref: String,
    pub duration: f64,
    pub bpm: f64,
    pub energy: f32,
    pub mood: Mood,
    pub device_count: usize,
    pub command_count: usize,

    /// Render metadata as stored JSON
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatRecord {
    pub timeline_id: String,
    pub index: usize,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub timeline_id: String,
    pub index: usize,
    pub timestamp: f64,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub amplitude: f32,
    pub dominant_frequency: f32,
}

/// A known light with its capabilities and latest profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub name: String,
    pub capabilities: Value,
    pub profile: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn profile(&self) -> Result<Option<DeviceProfile>> {
        self.profile
            .clone()
            .map(|p| {
                serde_json::from_value(p)
                    .with_context(|| format!("Corrupt profile for {}", self.device_id))
            })
            .transpose()
    }
}

#[derive(Clone)]
pub struct TimelineRepository {
    store: Arc<dyn ShowStore>,
}

impl TimelineRepository {
    pub fn new(store: Arc<dyn ShowStore>) -> Self {
        Self { store }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(value) => {
                let parsed = serde_json::from_value(value)
                    .with_context(|| format!("Corrupt store record {}", key))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)
            .with_context(|| format!("Failed to encode store record {}", key))?;
        self.store.set(key, &value)
    }

    /// Store a timeline with its children and document
    pub fn save_timeline(&self, timeline: &RenderTimeline) -> Result<TimelineRecord> {
        let id = &timeline.id;

        let beats: Vec<BeatRecord> = timeline
            .features
            .beats
            .iter()
            .enumerate()
            .map(|(index, &time)| BeatRecord {
                timeline_id: id.clone(),
                index,
                time,
            })
            .collect();
        self.write(&format!("{}{}", BEATS, id), &beats)?;

        let slices: Vec<SliceRecord> = timeline
            .features
            .slices
            .iter()
            .enumerate()
            .map(|(index, s)| SliceRecord {
                timeline_id: id.clone(),
                index,
                timestamp: s.timestamp,
                bass: s.bass,
                mid: s.mid,
                treble: s.treble,
                amplitude: s.amplitude,
                dominant_frequency: s.dominant_frequency,
            })
            .collect();
        self.write(&format!("{}{}", SLICES, id), &slices)?;

        let document = export_timeline(timeline)?;
        let document: Value =
            serde_json::from_str(&document).context("Failed to re-read exported timeline")?;
        self.store.set(&format!("{}{}", DOCUMENT, id), &document)?;

        let record = TimelineRecord {
            id: id.clone(),
            name: timeline.name.clone(),
            audio_ref: timeline.audio_ref.clone(),
            duration: timeline.duration,
            bpm: timeline.features.tempo,
            energy: timeline.features.energy,
            mood: timeline.features.mood,
            device_count: timeline.metadata.device_count,
            command_count: timeline.command_count(),
            metadata: serde_json::to_value(&timeline.metadata)
                .context("Failed to encode render metadata")?,
            created_at: timeline.metadata.generated_at,
        };
        self.write(&format!("{}{}", TIMELINE, id), &record)?;

        log::debug!(
            "Stored timeline {} ({} beats, {} slices)",
            id,
            beats.len(),
            slices.len()
        );
        Ok(record)
    }

    /// Full timeline, rebuilt from its stored document
    pub fn load_timeline(&self, id: &str) -> Result<Option<RenderTimeline>> {
        let Some(document) = self.store.get(&format!("{}{}", DOCUMENT, id))? else {
            return Ok(None);
        };
        let timeline = import_timeline(&document.to_string())
            .with_context(|| format!("Stored timeline {} is invalid", id))?;
        Ok(Some(timeline))
    }

    /// The stored export document for a timeline
    pub fn document(&self, id: &str) -> Result<Option<String>> {
        let document = self.store.get(&format!("{}{}", DOCUMENT, id))?;
        document
            .map(|d| serde_json::to_string_pretty(&d).context("Failed to encode timeline document"))
            .transpose()
    }

    pub fn timeline_record(&self, id: &str) -> Result<Option<TimelineRecord>> {
        self.read(&format!("{}{}", TIMELINE, id))
    }

    /// Summaries of every stored timeline, newest first
    pub fn list_timelines(&self) -> Result<Vec<TimelineRecord>> {
        let mut records = Vec::new();
        for key in self.store.list(TIMELINE)? {
            if let Some(record) = self.read::<TimelineRecord>(&key)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Beat records in index order
    pub fn beats(&self, id: &str) -> Result<Vec<BeatRecord>> {
        Ok(self
            .read(&format!("{}{}", BEATS, id))?
            .unwrap_or_default())
    }

    /// Slice records in index order
    pub fn slices(&self, id: &str) -> Result<Vec<SliceRecord>> {
        Ok(self
            .read(&format!("{}{}", SLICES, id))?
            .unwrap_or_default())
    }

    /// Remove a timeline and its children; returns whether it existed
    pub fn delete_timeline(&self, id: &str) -> Result<bool> {
        // summary first so a partial delete never lists
        let existed = self.store.remove(&format!("{}{}", TIMELINE, id))?;
        for prefix in [BEATS, SLICES, DOCUMENT] {
            self.store.remove(&format!("{}{}", prefix, id))?;
        }
        Ok(existed)
    }

    /// Store a device, keeping any profile already on record
    pub fn save_device(&self, device: &LightDevice) -> Result<DeviceRecord> {
        let key = format!("{}{}", DEVICE, device.id);
        let existing: Option<DeviceRecord> = self.read(&key)?;

        let record = DeviceRecord {
            device_id: device.id.clone(),
            name: device.name.clone(),
            capabilities: serde_json::to_value(&device.capabilities)
                .context("Failed to encode device capabilities")?,
            profile: existing.and_then(|r| r.profile),
            updated_at: Utc::now(),
        };
        self.write(&key, &record)?;
        Ok(record)
    }

    /// Merge a profile into the device record; returns the stored profile
    pub fn save_profile(&self, profile: &DeviceProfile) -> Result<DeviceProfile> {
        let key = format!("{}{}", DEVICE, profile.device_id);
        let existing: Option<DeviceRecord> = self.read(&key)?;

        let merged = match existing.as_ref().map(DeviceRecord::profile).transpose()? {
            Some(Some(old)) => old.merge(profile),
            _ => profile.clone(),
        };

        let (name, capabilities) = match existing {
            Some(record) => (record.name, record.capabilities),
            None => (profile.device_id.clone(), Value::Null),
        };
        let record = DeviceRecord {
            device_id: profile.device_id.clone(),
            name,
            capabilities,
            profile: Some(serde_json::to_value(&merged).context("Failed to encode profile")?),
            updated_at: Utc::now(),
        };
        self.write(&key, &record)?;
        Ok(merged)
    }

    pub fn device(&self, id: &str) -> Result<Option<DeviceRecord>> {
        self.read(&format!("{}{}", DEVICE, id))
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let mut records = Vec::new();
        for key in self.store.list(DEVICE)? {
            if let Some(record) = self.read::<DeviceRecord>(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Every stored profile
    pub fn load_profiles(&self) -> Result<ProfileBook> {
        let mut book = ProfileBook::new();
        for record in self.list_devices()? {
            if let Some(profile) = record.profile()? {
                book.upsert(profile);
            }
        }
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AudioFeatures, FrequencySlice};
    use crate::config::RenderSettings;
    use crate::model::{
        CalibrationMethod, DeviceTrack, EntityState, LightAttributes, RenderMetadata,
        TimedCommand,
    };
    use crate::store::{DirStore, MemoryStore};
    use chrono::Duration;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn timeline(id: &str) -> RenderTimeline {
        let slices = (0..4)
            .map(|i| FrequencySlice {
                timestamp: i as f64 * 0.25,
                bass: 0.1 * i as f32,
                mid: 0.2,
                treble: 0.3,
                amplitude: 0.4,
                dominant_frequency: 440.0,
            })
            .collect();
        let mut track = DeviceTrack::new("light.a", "A");
        track.commands = vec![TimedCommand::turn_on(0.0), TimedCommand::turn_off(1.0)];
        RenderTimeline {
            id: id.to_string(),
            name: "Song".into(),
            audio_ref: "/music/song.wav".into(),
            features: AudioFeatures {
                tempo: 120.0,
                beats: vec![0.0, 0.5],
                slices,
                energy: 0.3,
                mood: Mood::Energetic,
                duration: 1.0,
            },
            duration: 1.0,
            tracks: vec![track],
            metadata: RenderMetadata {
                settings: RenderSettings::default(),
                device_count: 1,
                command_count: 2,
                processing_time_ms: 1.5,
                generated_at: Utc::now(),
                compensation: BTreeMap::new(),
                optimized_removed: 0,
            },
        }
    }

    fn device(id: &str) -> LightDevice {
        LightDevice::from_entity(&EntityState {
            entity_id: id.to_string(),
            state: "off".into(),
            attributes: LightAttributes::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_timeline_round_trip() {
        let repo = TimelineRepository::new(Arc::new(MemoryStore::new()));
        let tl = timeline("abc");
        let record = repo.save_timeline(&tl).unwrap();
        assert_eq!(record.bpm, 120.0);
        assert_eq!(record.command_count, 2);

        assert_eq!(repo.load_timeline("abc").unwrap(), Some(tl));
        assert_eq!(repo.beats("abc").unwrap().len(), 2);
        let slices = repo.slices("abc").unwrap();
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[3].index, 3);
        assert!(repo.load_timeline("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_and_delete_on_disk() {
        let dir = TempDir::new().unwrap();
        let repo = TimelineRepository::new(Arc::new(DirStore::open(dir.path()).unwrap()));
        repo.save_timeline(&timeline("one")).unwrap();
        repo.save_timeline(&timeline("two")).unwrap();
        assert_eq!(repo.list_timelines().unwrap().len(), 2);

        assert!(repo.delete_timeline("one").unwrap());
        assert!(!repo.delete_timeline("one").unwrap());
        assert_eq!(repo.list_timelines().unwrap().len(), 1);
        assert!(repo.beats("one").unwrap().is_empty());
        assert!(repo.document("two").unwrap().is_some());
    }

    #[test]
    fn test_profiles_merge_and_survive_device_updates() {
        let repo = TimelineRepository::new(Arc::new(MemoryStore::new()));
        repo.save_device(&device("light.a")).unwrap();

        let t0 = Utc::now() - Duration::days(1);
        let mut first =
            DeviceProfile::new("light.a", 120.0, CalibrationMethod::Auto).with_calibrated_at(t0);
        first.color_accuracy = Some(0.8);
        repo.save_profile(&first).unwrap();

        let second = DeviceProfile::new("light.a", 90.0, CalibrationMethod::Auto)
            .with_calibrated_at(Utc::now());
        let merged = repo.save_profile(&second).unwrap();
        assert_eq!(merged.latency_ms, 90.0);
        assert_eq!(merged.color_accuracy, Some(0.8));

        // re-scanning the device keeps the profile
        repo.save_device(&device("light.a")).unwrap();
        let book = repo.load_profiles().unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(book.get("light.a").map(|p| p.latency_ms), Some(90.0));
        assert_eq!(repo.device("light.a").unwrap().map(|r| r.name), Some("light.a".to_string()));
    }
}
