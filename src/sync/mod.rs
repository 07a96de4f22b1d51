//! Cross-device synchronization
//!
//! Each light gets a latency (measured, or estimated from its manufacturer).
//! The fastest light sets the reference; every other light receives its
//! commands earlier by the difference so all of them change together.

use crate::config::LatencyEstimates;
use crate::model::{DeviceProfile, DeviceTrack, LightDevice, ProfileBook, TimedCommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

impl LatencyEstimates {
    /// Latency estimate for a manufacturer/model string
    pub fn estimate(&self, manufacturer: Option<&str>, model: Option<&str>) -> f64 {
        let haystack = format!(
            "{} {}",
            manufacturer.unwrap_or_default(),
            model.unwrap_or_default()
        )
        .to_lowercase();
        let matches = |words: &[String]| words.iter().any(|w| haystack.contains(w.as_str()));

        if matches(&self.fast_keywords) {
            self.fast_ms
        } else if matches(&self.medium_keywords) {
            self.medium_ms
        } else if matches(&self.slow_keywords) {
            self.slow_ms
        } else {
            self.unknown_ms
        }
    }
}

/// Computes reference latency and per-light compensation
#[derive(Debug, Clone, Default)]
pub struct SyncCalculator {
    estimates: LatencyEstimates,
}

impl SyncCalculator {
    pub fn new(estimates: LatencyEstimates) -> Self {
        Self { estimates }
    }

    /// Profiled latency, or the manufacturer estimate
    pub fn device_latency(&self, device: &LightDevice, profile: Option<&DeviceProfile>) -> f64 {
        match profile {
            Some(p) => p.latency_ms,
            None => self
                .estimates
                .estimate(device.manufacturer.as_deref(), device.model.as_deref()),
        }
    }

    /// Smallest latency in the set (0 for no devices)
    pub fn reference_latency(&self, devices: &[LightDevice], profiles: &ProfileBook) -> f64 {
        devices
            .iter()
            .map(|d| self.device_latency(d, profiles.get(&d.id)))
            .min_by(f64::total_cmp)
            .unwrap_or(0.0)
    }

    /// How much earlier this light must be commanded (ms, never negative)
    pub fn compensation_ms(
        &self,
        device: &LightDevice,
        profile: Option<&DeviceProfile>,
        reference_latency: f64,
    ) -> f64 {
        (self.device_latency(device, profile) - reference_latency).max(0.0)
    }

    /// Compensation table for a device set
    pub fn plan(&self, devices: &[LightDevice], profiles: &ProfileBook) -> SyncPlan {
        let reference_ms = self.reference_latency(devices, profiles);
        let compensation = devices
            .iter()
            .map(|d| {
                let ms = self.compensation_ms(d, profiles.get(&d.id), reference_ms);
                log::debug!("{}: compensation {:.1}ms", d.id, ms);
                (d.id.clone(), ms)
            })
            .collect();

        SyncPlan {
            reference_ms,
            compensation,
        }
    }
}

/// Reference latency and per-light compensation for one render
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub reference_ms: f64,
    pub compensation: BTreeMap<String, f64>,
}

impl SyncPlan {
    pub fn compensation_for(&self, device_id: &str) -> f64 {
        self.compensation.get(device_id).copied().unwrap_or(0.0)
    }
}

/// Shift a track earlier by `compensation_ms`
///
/// Timestamps clamp at 0; no command is dropped or reordered. The original
/// timestamp is kept on every command when the shift is non-zero.
pub fn apply_compensation(track: &DeviceTrack, compensation_ms: f64) -> DeviceTrack {
    let mut shifted = track.clone();
    shifted.compensation_ms = compensation_ms;
    if compensation_ms <= 0.0 {
        return shifted;
    }

    let offset = compensation_ms / 1000.0;
    for cmd in &mut shifted.commands {
        let original = cmd.scheduled_for();
        cmd.original_timestamp = Some(original);
        cmd.timestamp = (original - offset).max(0.0);
    }
    shifted
}

/// Batch commands whose timestamps fall within `min_interval_ms` of the
/// first command of the batch
///
/// Concatenating the batches gives back the input order.
pub fn group_commands(commands: &[TimedCommand], min_interval_ms: f64) -> Vec<Vec<TimedCommand>> {
    let window = min_interval_ms.max(0.0) / 1000.0;
    let mut groups: Vec<Vec<TimedCommand>> = Vec::new();
    let mut batch_start = f64::NEG_INFINITY;

    for cmd in commands {
        match groups.last_mut() {
            Some(batch) if cmd.timestamp - batch_start <= window => batch.push(cmd.clone()),
            _ => {
                batch_start = cmd.timestamp;
                groups.push(vec![cmd.clone()]);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CalibrationMethod, DeviceCapabilities, DeviceState};

    fn light(id: &str, manufacturer: Option<&str>) -> LightDevice {
        LightDevice {
            id: id.to_string(),
            name: id.to_string(),
            manufacturer: manufacturer.map(str::to_string),
            model: None,
            area: None,
            capabilities: DeviceCapabilities::default(),
            state: DeviceState::default(),
        }
    }

    fn book(entries: &[(&str, f64)]) -> ProfileBook {
        entries
            .iter()
            .map(|(id, ms)| DeviceProfile::new(*id, *ms, CalibrationMethod::Auto))
            .collect()
    }

    #[test]
    fn test_fast_and_slow_devices() {
        let devices = vec![light("light.fast", None), light("light.slow", None)];
        let profiles = book(&[("light.fast", 50.0), ("light.slow", 300.0)]);
        let sync = SyncCalculator::default();

        let reference = sync.reference_latency(&devices, &profiles);
        assert_eq!(reference, 50.0);
        assert_eq!(
            sync.compensation_ms(&devices[0], profiles.get("light.fast"), reference),
            0.0
        );
        assert_eq!(
            sync.compensation_ms(&devices[1], profiles.get("light.slow"), reference),
            250.0
        );

        let plan = sync.plan(&devices, &profiles);
        assert_eq!(plan.compensation_for("light.fast"), 0.0);
        assert_eq!(plan.compensation_for("light.slow"), 250.0);
    }

    #[test]
    fn test_estimates_by_manufacturer() {
        let estimates = LatencyEstimates::default();
        assert_eq!(estimates.estimate(Some("LIFX"), None), 65.0);
        assert_eq!(estimates.estimate(Some("Signify Netherlands B.V."), None), 135.0);
        assert_eq!(estimates.estimate(None, Some("Yeelight Bulb")), 275.0);
        assert_eq!(estimates.estimate(Some("Acme"), None), 200.0);
        assert_eq!(estimates.estimate(None, None), 200.0);
    }

    #[test]
    fn test_unprofiled_devices_use_estimates() {
        let devices = vec![light("light.hue", Some("Philips")), light("light.tuya", Some("Tuya"))];
        let sync = SyncCalculator::default();
        let plan = sync.plan(&devices, &ProfileBook::new());
        assert_eq!(plan.reference_ms, 135.0);
        assert_eq!(plan.compensation_for("light.tuya"), 140.0);
        assert_eq!(sync.reference_latency(&[], &ProfileBook::new()), 0.0);
    }

    #[test]
    fn test_apply_compensation_clamps_and_keeps_originals() {
        let mut track = DeviceTrack::new("light.slow", "Slow");
        track.commands = vec![
            TimedCommand::turn_on(0.0),
            TimedCommand::turn_on(0.1),
            TimedCommand::turn_on(1.0),
        ];

        let shifted = apply_compensation(&track, 250.0);
        let times: Vec<f64> = shifted.commands.iter().map(|c| c.timestamp).collect();
        assert_eq!(times, vec![0.0, 0.0, 0.75]);
        assert!(shifted.commands.iter().all(|c| c.timestamp >= 0.0));
        assert_eq!(shifted.commands[1].original_timestamp, Some(0.1));
        assert_eq!(shifted.compensation_ms, 250.0);
        assert!(shifted.is_ordered());

        let unchanged = apply_compensation(&track, 0.0);
        assert!(unchanged.commands.iter().all(|c| c.original_timestamp.is_none()));
    }

    #[test]
    fn test_reapplying_uses_original_timestamps() {
        let mut track = DeviceTrack::new("light.a", "A");
        track.commands = vec![TimedCommand::turn_on(2.0)];
        let once = apply_compensation(&track, 500.0);
        let twice = apply_compensation(&once, 500.0);
        assert_eq!(twice.commands[0].timestamp, 1.5);
    }

    #[test]
    fn test_group_commands_preserves_order() {
        let commands: Vec<TimedCommand> = [0.0, 0.05, 0.1, 0.25, 0.3, 1.0]
            .iter()
            .map(|&t| TimedCommand::turn_on(t))
            .collect();

        let groups = group_commands(&commands, 100.0);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2, 1]);

        let flattened: Vec<TimedCommand> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, commands);
    }
}
