//! Timeline generation from analysis results

use super::color::{damp_color, frequency_color, mireds_for, mood_color, BrightnessCurve, LinearCurve};
use super::emphasis::emphasize_beats;
use super::optimize::optimize_timeline;
use crate::analysis::{AudioFeatures, FrequencySlice};
use crate::config::{ColorMapping, RenderSettings, SimilarityThresholds};
use crate::error::{Result, ShowError};
use crate::model::{
    CommandParams, CommandType, DeviceProfile, DeviceTrack, LightDevice, ProfileBook,
    RenderMetadata, RenderTimeline, TimedCommand,
};
use crate::sync::{apply_compensation, SyncCalculator};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Per-render inputs that are not settings
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Display name; defaults to the audio file stem
    pub name: Option<String>,

    /// Audio file the show belongs to
    pub audio_ref: String,
}

impl GenerateOptions {
    pub fn new(audio_ref: impl Into<String>) -> Self {
        Self {
            name: None,
            audio_ref: audio_ref.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            Path::new(&self.audio_ref)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string()
        })
    }
}

/// Builds per-light command tracks from [`AudioFeatures`]
pub struct TimelineGenerator {
    settings: RenderSettings,
    sync: SyncCalculator,
    similarity: SimilarityThresholds,
    curve: Arc<dyn BrightnessCurve>,
}

impl TimelineGenerator {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            sync: SyncCalculator::default(),
            similarity: SimilarityThresholds::default(),
            curve: Arc::new(LinearCurve),
        }
    }

    pub fn with_sync(mut self, sync: SyncCalculator) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityThresholds) -> Self {
        self.similarity = similarity;
        self
    }

    /// Brightness correction applied to every mapped brightness
    pub fn with_curve(mut self, curve: Arc<dyn BrightnessCurve>) -> Self {
        self.curve = curve;
        self
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Render a timeline for `devices`, in their given order
    pub fn generate(
        &self,
        features: &AudioFeatures,
        devices: &[LightDevice],
        profiles: &ProfileBook,
        options: &GenerateOptions,
    ) -> Result<RenderTimeline> {
        self.validate(features, devices)?;
        let started = Instant::now();
        log::info!(
            "Rendering {} lights over {:.1}s ({} slices, {} beats)",
            devices.len(),
            features.duration,
            features.slices.len(),
            features.beats.len()
        );

        let plan = self.sync.plan(devices, profiles);
        let mut compensation = BTreeMap::new();
        let mut tracks = Vec::with_capacity(devices.len());

        for device in devices {
            let profile = profiles.get(&device.id);
            let mut track = self.render_track(features, device, profile);

            if self.settings.beat_sync {
                track = emphasize_beats(&track, &features.beats, device, &self.settings);
            }
            if self.settings.apply_compensation {
                let ms = plan.compensation_for(&device.id);
                track = apply_compensation(&track, ms);
                compensation.insert(device.id.clone(), ms);
            }

            log::debug!("{}: {} commands", device.id, track.len());
            tracks.push(track);
        }

        let generated_at = Utc::now();
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        let command_count = tracks.iter().map(DeviceTrack::len).sum();
        let timeline = RenderTimeline {
            id: RenderTimeline::make_id(&options.audio_ref, &ids, &generated_at),
            name: options.display_name(),
            audio_ref: options.audio_ref.clone(),
            features: features.clone(),
            duration: features.duration,
            tracks,
            metadata: RenderMetadata {
                settings: self.settings.clone(),
                device_count: devices.len(),
                command_count,
                processing_time_ms: 0.0,
                generated_at,
                compensation,
                optimized_removed: 0,
            },
        };

        let mut timeline = if self.settings.optimize {
            optimize_timeline(&timeline, &self.similarity).0
        } else {
            timeline
        };
        timeline.metadata.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        log::info!(
            "Rendered timeline {} with {} commands in {:.1}ms",
            timeline.id,
            timeline.metadata.command_count,
            timeline.metadata.processing_time_ms
        );
        Ok(timeline)
    }

    fn validate(&self, features: &AudioFeatures, devices: &[LightDevice]) -> Result<()> {
        if devices.is_empty() {
            return Err(ShowError::input("no devices to render for"));
        }
        let intensity = self.settings.intensity;
        if !(0.0..=1.0).contains(&intensity) {
            return Err(ShowError::input(format!(
                "intensity must be within [0, 1], got {}",
                intensity
            )));
        }
        if !features.duration.is_finite() || features.duration <= 0.0 {
            return Err(ShowError::input("audio has no duration"));
        }
        Ok(())
    }

    fn render_track(
        &self,
        features: &AudioFeatures,
        device: &LightDevice,
        profile: Option<&DeviceProfile>,
    ) -> DeviceTrack {
        let s = &self.settings;
        let min_gap = s.min_command_interval_ms / 1000.0;
        let transition = if s.smooth_transitions {
            profile.map_or(min_gap, |p| p.clamp_transition(min_gap))
        } else {
            0.0
        };
        let flash_effect = device.flash_effect();

        let mut track = DeviceTrack::new(&device.id, &device.name);
        track.commands.push(TimedCommand::turn_on(0.0));
        let mut last_emitted = 0.0;

        for slice in &features.slices {
            if slice.timestamp - last_emitted < min_gap {
                continue;
            }
            let on_beat = s.beat_sync
                && features
                    .nearest_beat(slice.timestamp)
                    .is_some_and(|(_, distance)| distance <= s.beat_window_s);

            let command = match (on_beat, flash_effect) {
                (true, Some(effect)) => Some(TimedCommand::new(
                    slice.timestamp,
                    CommandType::Effect,
                    CommandParams {
                        effect: Some(effect.to_string()),
                        ..Default::default()
                    },
                )),
                _ => {
                    let boost = if on_beat { s.beat_boost } else { 1.0 };
                    self.slice_command(features, slice, device, profile, boost, transition)
                }
            };

            if let Some(cmd) = command {
                last_emitted = cmd.timestamp;
                track.commands.push(cmd);
            }
        }

        track
            .commands
            .push(TimedCommand::turn_off(features.duration));
        track
    }

    /// Map one slice to the richest command the light supports
    fn slice_command(
        &self,
        features: &AudioFeatures,
        slice: &FrequencySlice,
        device: &LightDevice,
        profile: Option<&DeviceProfile>,
        boost: f64,
        transition: f64,
    ) -> Option<TimedCommand> {
        let caps = &device.capabilities;
        if !caps.supports_brightness {
            return None;
        }
        let intensity = self.settings.intensity;

        let raw = slice.peak_band() as f64 * intensity * 255.0 * boost;
        let brightness = caps.clamp_brightness(self.curve.apply(caps.clamp_brightness(raw)) as f64);

        let mut params = CommandParams {
            brightness: Some(brightness),
            transition: Some(transition),
            ..Default::default()
        };

        let command = if caps.supports_color {
            let rgb = match self.settings.color_mapping {
                ColorMapping::Frequency => frequency_color(slice, intensity),
                ColorMapping::Mood => mood_color(features.mood, slice, intensity),
            };
            let accuracy = profile
                .filter(|_| self.settings.use_color_accuracy)
                .and_then(|p| p.color_accuracy);
            params.rgb = Some(match accuracy {
                Some(a) => damp_color(rgb, a),
                None => rgb,
            });
            CommandType::SetColor
        } else if let Some(range) = caps.mireds_range {
            params.color_temp = Some(mireds_for(slice, range));
            CommandType::SetColorTemp
        } else {
            CommandType::SetBrightness
        };

        Some(TimedCommand::new(slice.timestamp, command, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Mood;
    use crate::model::{CalibrationMethod, ColorMode, DeviceCapabilities, DeviceState, LightAttributes};

    fn features() -> AudioFeatures {
        let slices = (0..50)
            .map(|i| FrequencySlice {
                timestamp: i as f64 / 10.0,
                bass: 0.8,
                mid: 0.4,
                treble: 0.2,
                amplitude: 0.6,
                dominant_frequency: 80.0,
            })
            .collect();
        AudioFeatures {
            tempo: 120.0,
            beats: vec![1.0, 1.5, 2.0, 2.5, 3.0],
            slices,
            energy: 0.6,
            mood: Mood::Dramatic,
            duration: 5.0,
        }
    }

    fn light(id: &str, attrs: LightAttributes) -> LightDevice {
        LightDevice {
            id: id.to_string(),
            name: id.to_string(),
            manufacturer: None,
            model: None,
            area: None,
            capabilities: DeviceCapabilities::from_attributes(&attrs),
            state: DeviceState::default(),
        }
    }

    fn rgb_light(id: &str) -> LightDevice {
        light(
            id,
            LightAttributes {
                supported_color_modes: vec![ColorMode::Rgb],
                ..Default::default()
            },
        )
    }

    /// One command per 0.1s slice
    fn settings(beat_sync: bool, apply_compensation: bool) -> RenderSettings {
        RenderSettings {
            beat_sync,
            apply_compensation,
            min_command_interval_ms: 90.0,
            ..Default::default()
        }
    }

    fn no_beats() -> RenderSettings {
        settings(false, false)
    }

    fn render(settings: RenderSettings, devices: &[LightDevice], profiles: &ProfileBook) -> RenderTimeline {
        TimelineGenerator::new(settings)
            .generate(&features(), devices, profiles, &GenerateOptions::new("/music/song.wav"))
            .unwrap()
    }

    #[test]
    fn test_track_shape_and_rate_limit() {
        let timeline = render(no_beats(), &[rgb_light("light.a")], &ProfileBook::new());
        assert_eq!(timeline.name, "song");
        assert_eq!(timeline.metadata.device_count, 1);

        let track = &timeline.tracks[0];
        let first = track.commands.first().unwrap();
        let last = track.commands.last().unwrap();
        assert_eq!(first.command, CommandType::TurnOn);
        assert_eq!(first.timestamp, 0.0);
        assert_eq!(last.command, CommandType::TurnOff);
        assert_eq!(last.timestamp, 5.0);
        assert!(track.is_ordered());

        for pair in track.commands[1..track.len() - 1].windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp >= 0.09);
        }
        assert_eq!(track.len(), 49 + 2);
    }

    #[test]
    fn test_frequency_mapping_values() {
        let timeline = render(no_beats(), &[rgb_light("light.a")], &ProfileBook::new());
        let cmd = &timeline.tracks[0].commands[1];
        assert_eq!(cmd.command, CommandType::SetColor);
        // 0.8 · 0.8 · 255
        assert_eq!(cmd.params.brightness, Some(163));
        assert_eq!(cmd.params.rgb, Some([163, 82, 41]));
        assert_eq!(cmd.params.transition, Some(0.09));
    }

    #[test]
    fn test_capability_fallbacks() {
        let temp = light(
            "light.temp",
            LightAttributes {
                supported_color_modes: vec![ColorMode::ColorTemp],
                min_mireds: Some(153),
                max_mireds: Some(500),
                ..Default::default()
            },
        );
        let dimmer = light(
            "light.dim",
            LightAttributes {
                supported_color_modes: vec![ColorMode::Brightness],
                ..Default::default()
            },
        );
        let plain = light(
            "light.plain",
            LightAttributes {
                supported_color_modes: vec![ColorMode::Onoff],
                ..Default::default()
            },
        );
        let timeline = render(no_beats(), &[temp, dimmer, plain], &ProfileBook::new());

        assert_eq!(timeline.tracks[0].commands[1].command, CommandType::SetColorTemp);
        // treble share 0.2 / 1.0
        assert_eq!(timeline.tracks[0].commands[1].params.color_temp, Some(431));
        assert_eq!(timeline.tracks[1].commands[1].command, CommandType::SetBrightness);
        assert_eq!(timeline.tracks[2].len(), 2);
    }

    #[test]
    fn test_beats_use_flash_effect() {
        let strobe = light(
            "light.strobe",
            LightAttributes {
                supported_color_modes: vec![ColorMode::Rgb],
                effect_list: Some(vec!["Rainbow".into(), "Strobe".into()]),
                ..Default::default()
            },
        );
        let timeline = render(settings(true, false), &[strobe, rgb_light("light.rgb")], &ProfileBook::new());

        let effects: Vec<f64> = timeline.tracks[0]
            .commands
            .iter()
            .filter(|c| c.command == CommandType::Effect)
            .map(|c| c.timestamp)
            .collect();
        assert_eq!(effects.len(), 5);
        assert!(timeline.tracks[0]
            .commands
            .iter()
            .filter(|c| c.command == CommandType::Effect)
            .all(|c| c.params.effect.as_deref() == Some("Strobe")));

        // without effects the on-beat slice is boosted, then emphasized
        let on_beat = timeline.tracks[1]
            .commands
            .iter()
            .find(|c| (c.timestamp - 1.0).abs() < 1e-9)
            .unwrap();
        assert_eq!(on_beat.params.brightness, Some(255));
    }

    #[test]
    fn test_compensation_applied_per_device() {
        let devices = [rgb_light("light.fast"), rgb_light("light.slow")];
        let profiles: ProfileBook = [
            DeviceProfile::new("light.fast", 50.0, CalibrationMethod::Auto),
            DeviceProfile::new("light.slow", 300.0, CalibrationMethod::Auto),
        ]
        .into_iter()
        .collect();
        let timeline = render(settings(false, true), &devices, &profiles);

        assert_eq!(timeline.tracks[0].compensation_ms, 0.0);
        assert_eq!(timeline.tracks[1].compensation_ms, 250.0);
        assert_eq!(timeline.metadata.compensation["light.slow"], 250.0);

        let slow = &timeline.tracks[1];
        assert!(slow.commands.iter().all(|c| c.timestamp >= 0.0));
        assert!(slow.commands.iter().all(|c| c.original_timestamp.is_some()));
        assert_eq!(slow.len(), timeline.tracks[0].len());
        let off = slow.commands.last().unwrap();
        assert!((off.timestamp - 4.75).abs() < 1e-9);
        assert_eq!(off.original_timestamp, Some(5.0));
    }

    #[test]
    fn test_color_accuracy_damps() {
        let profiles: ProfileBook = std::iter::once({
            let mut p = DeviceProfile::new("light.a", 100.0, CalibrationMethod::Auto);
            p.color_accuracy = Some(0.0);
            p
        })
        .collect();
        let timeline = render(no_beats(), &[rgb_light("light.a")], &profiles);
        let rgb = timeline.tracks[0].commands[1].params.rgb.unwrap();
        assert!(rgb[0] == rgb[1] && rgb[1] == rgb[2]);
    }

    #[test]
    fn test_input_errors() {
        let generator = TimelineGenerator::new(RenderSettings::default());
        let options = GenerateOptions::new("x.wav");
        assert!(matches!(
            generator.generate(&features(), &[], &ProfileBook::new(), &options),
            Err(ShowError::Input(_))
        ));

        let loud = TimelineGenerator::new(RenderSettings {
            intensity: 1.5,
            ..Default::default()
        });
        assert!(loud
            .generate(&features(), &[rgb_light("light.a")], &ProfileBook::new(), &options)
            .is_err());

        let mut empty = features();
        empty.duration = 0.0;
        assert!(generator
            .generate(&empty, &[rgb_light("light.a")], &ProfileBook::new(), &options)
            .is_err());
    }
}
