//! Optional profile tests: effects, brightness linearity, color accuracy
//!
//! Each test runs only when the light has the matching capability and leaves
//! its field unknown when nothing could be measured.

use super::cancel::CancelToken;
use super::device_profiler::DeviceProfiler;
use super::probe::color_score;
use super::stats::{mean, r_squared};
use crate::error::Result;
use crate::model::{DeviceProfile, EffectPerformance, LightDevice, ServiceCall};
use chrono::Utc;
use std::time::{Duration, Instant};

/// Fractions of full brightness used for the linearity regression
const LINEARITY_LEVELS: [f64; 5] = [0.2, 0.4, 0.6, 0.8, 1.0];

/// Primary colors swept by the accuracy test
const SWEEP: [[u8; 3]; 3] = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];

impl DeviceProfiler {
    pub(super) fn run_extended(
        &self,
        device: &LightDevice,
        profile: &mut DeviceProfile,
        token: &CancelToken,
    ) -> Result<()> {
        let caps = &device.capabilities;
        // wait long enough for a command to become visible
        let settle = self.config.settle() + Duration::from_secs_f64(profile.latency_ms / 1000.0);

        if caps.supports_effects {
            for effect in caps.effects.iter().take(self.config.max_effects) {
                let perf = self.measure_effect(device, effect, token)?;
                profile.effect_performance.insert(effect.clone(), perf);
            }
        }

        if caps.supports_brightness {
            profile.brightness_linearity = self.measure_linearity(device, settle, token)?;
        }

        if caps.supports_color {
            profile.color_accuracy = self.measure_color_accuracy(device, settle, token)?;
        }

        log::debug!(
            "{} extended: {} effects, linearity {:?}, color accuracy {:?}",
            device.id,
            profile.effect_performance.len(),
            profile.brightness_linearity,
            profile.color_accuracy
        );
        Ok(())
    }

    fn measure_effect(
        &self,
        device: &LightDevice,
        effect: &str,
        token: &CancelToken,
    ) -> Result<EffectPerformance> {
        let start = Instant::now();
        let call = ServiceCall::new("light", "turn_on", &device.id).with("effect", effect);
        let reached = if self.send(call) {
            self.wait_for(&device.id, start, self.config.timeout(), token, |s| {
                s.attributes.effect.as_deref() == Some(effect)
            })?
        } else {
            None
        };

        Ok(EffectPerformance {
            latency_ms: reached.map(|d| d.as_secs_f64() * 1000.0),
            success: reached.is_some(),
            measured_at: Utc::now(),
        })
    }

    fn measure_linearity(
        &self,
        device: &LightDevice,
        settle: Duration,
        token: &CancelToken,
    ) -> Result<Option<f64>> {
        let max = device.capabilities.brightness_range.1 as f64;
        let mut points = Vec::with_capacity(LINEARITY_LEVELS.len());

        for level in LINEARITY_LEVELS {
            let commanded = (max * level).round() as u8;
            let call = ServiceCall::new("light", "turn_on", &device.id)
                .with("brightness", commanded)
                .with("transition", 0.0);
            if !self.send(call) {
                continue;
            }
            self.sleep(settle, token)?;

            match self.api.get_state(&device.id) {
                Ok(Some(state)) => {
                    if let Some(reported) = state.attributes.brightness {
                        points.push((commanded as f64, reported as f64));
                    }
                }
                Ok(None) => {}
                Err(e) => log::debug!("{}: brightness readback failed: {}", device.id, e),
            }
        }

        if points.len() < 3 {
            return Ok(None);
        }
        Ok(Some(r_squared(&points)))
    }

    fn measure_color_accuracy(
        &self,
        device: &LightDevice,
        settle: Duration,
        token: &CancelToken,
    ) -> Result<Option<f64>> {
        let mut scores = Vec::with_capacity(SWEEP.len());

        for target in SWEEP {
            let call = ServiceCall::new("light", "turn_on", &device.id)
                .with("rgb_color", target.to_vec())
                .with("transition", 0.0);
            if !self.send(call) {
                continue;
            }
            self.sleep(settle, token)?;

            if let Some(observed) = self.probe.measure(self.api.as_ref(), device) {
                scores.push(color_score(target, observed));
            }
        }

        Ok(mean(&scores))
    }
}
