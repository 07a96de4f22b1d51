//! Latency and transition measurement

use super::cancel::CancelToken;
use super::probe::{ColorProbe, ReportedColorProbe};
use super::stats::{mean, percentile, std_dev};
use crate::config::ProfilerConfig;
use crate::device::DeviceApi;
use crate::error::{Result, ShowError};
use crate::model::{CalibrationMethod, DeviceProfile, EntityState, LightDevice, ServiceCall};
use chrono::Utc;
use rayon::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Share of the maximum brightness that counts as "transition finished"
const TRANSITION_DONE_RATIO: f64 = 0.95;

/// Observed transition may deviate this much from the request
const TRANSITION_TOLERANCE: f64 = 0.5;

/// Drives lights through test sequences and derives a [`DeviceProfile`]
///
/// Every step goes through [`DeviceApi`]. Failed calls, missing states and
/// timeouts become failed samples; only cancellation and bad arguments end
/// a run early.
pub struct DeviceProfiler {
    pub(super) api: Arc<dyn DeviceApi>,
    pub(super) config: ProfilerConfig,
    pub(super) probe: Arc<dyn ColorProbe>,
}

impl DeviceProfiler {
    pub fn new(api: Arc<dyn DeviceApi>, config: ProfilerConfig) -> Self {
        Self {
            api,
            config,
            probe: Arc::new(ReportedColorProbe),
        }
    }

    /// Replace the color measurement used by the accuracy sweep
    pub fn with_probe(mut self, probe: Arc<dyn ColorProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Profile one light
    pub fn profile_device(&self, device: &LightDevice, iterations: u32) -> Result<DeviceProfile> {
        self.profile_with_cancel(device, iterations, &CancelToken::new())
    }

    /// Profile many lights in parallel, one result per light in input order
    pub fn profile_all(
        &self,
        devices: &[LightDevice],
        iterations: u32,
    ) -> Vec<(String, Result<DeviceProfile>)> {
        log::info!("Profiling {} lights in parallel", devices.len());
        devices
            .par_iter()
            .map(|device| (device.id.clone(), self.profile_device(device, iterations)))
            .collect()
    }

    /// Profile one light, stopping with [`ShowError::Cancelled`] once `token` trips
    pub fn profile_with_cancel(
        &self,
        device: &LightDevice,
        iterations: u32,
        token: &CancelToken,
    ) -> Result<DeviceProfile> {
        if iterations == 0 {
            return Err(ShowError::input("profiling needs at least one iteration"));
        }
        log::info!("Profiling {} with {} iterations", device, iterations);
        let started = Instant::now();

        let mut samples = Vec::with_capacity(iterations as usize);
        let mut failed = 0u32;
        for iteration in 1..=iterations {
            match self.measure_latency(device, token)? {
                Some(ms) => {
                    log::debug!("{} iteration {}: {:.1}ms", device.id, iteration, ms);
                    samples.push(ms);
                }
                None => {
                    log::debug!("{} iteration {}: failed", device.id, iteration);
                    failed += 1;
                }
            }
        }

        let latency_ms = mean(&samples).unwrap_or(self.config.default_latency_ms);
        let mut profile = DeviceProfile::new(&device.id, latency_ms, CalibrationMethod::Auto);
        profile.response_std_dev_ms = std_dev(&samples);
        profile.p99_response_ms = percentile(&samples, 99.0);
        profile.successful_samples = samples.len() as u32;
        profile.failed_samples = failed;

        if failed == iterations {
            log::warn!(
                "{}: no latency sample succeeded, using default {:.0}ms",
                device.id,
                latency_ms
            );
        }

        if device.capabilities.supports_brightness {
            let (min, max) = self.measure_transitions(device, latency_ms, token)?;
            profile.min_transition_s = min;
            profile.max_transition_s = max;
        }

        if self.config.extended {
            self.run_extended(device, &mut profile, token)?;
        }

        self.restore(device);
        profile.last_calibrated = Utc::now();

        log::info!(
            "Profiled {}: latency {:.1}ms ({} ok, {} failed) in {:.1}s",
            device.id,
            profile.latency_ms,
            profile.successful_samples,
            profile.failed_samples,
            started.elapsed().as_secs_f64()
        );
        Ok(profile)
    }

    /// One off → settle → on → poll cycle; `None` is a failed sample
    fn measure_latency(&self, device: &LightDevice, token: &CancelToken) -> Result<Option<f64>> {
        let off_at = Instant::now();
        if self.send(ServiceCall::new("light", "turn_off", &device.id)) {
            self.wait_for(&device.id, off_at, self.config.timeout(), token, |s| !s.is_on())?;
        }
        self.sleep(self.config.settle(), token)?;

        let start = Instant::now();
        if !self.send(ServiceCall::new("light", "turn_on", &device.id)) {
            return Ok(None);
        }
        let reached = self.wait_for(&device.id, start, self.config.timeout(), token, |s| s.is_on())?;
        Ok(reached.map(|elapsed| elapsed.as_secs_f64() * 1000.0))
    }

    /// Proven (min, max) transition from the configured targets
    fn measure_transitions(
        &self,
        device: &LightDevice,
        latency_ms: f64,
        token: &CancelToken,
    ) -> Result<(Option<f64>, Option<f64>)> {
        let max_brightness = device.capabilities.brightness_range.1;
        let done_at = (max_brightness as f64 * TRANSITION_DONE_RATIO).ceil() as u8;
        let dark_below = (max_brightness as f64 * (1.0 - TRANSITION_DONE_RATIO)).floor() as u8;
        let mut honoured: Vec<f64> = Vec::new();

        for &target in &self.config.transition_targets {
            let reset = ServiceCall::new("light", "turn_on", &device.id)
                .with("brightness", 0)
                .with("transition", 0.0);
            let reset_at = Instant::now();
            if !self.send(reset) {
                continue;
            }
            let dark = self.wait_for(&device.id, reset_at, self.config.timeout(), token, |s| {
                s.is_on() && s.attributes.brightness.is_some_and(|b| b <= dark_below)
            })?;
            if dark.is_none() {
                log::debug!("{}: brightness never reached 0 before {:.2}s test", device.id, target);
                continue;
            }
            self.sleep(self.config.settle(), token)?;

            let start = Instant::now();
            let ramp = ServiceCall::new("light", "turn_on", &device.id)
                .with("brightness", max_brightness)
                .with("transition", target);
            if !self.send(ramp) {
                continue;
            }

            let limit = Duration::from_secs_f64(target.max(0.0)) + self.config.timeout();
            let reached = self.wait_for(&device.id, start, limit, token, |s| {
                s.attributes.brightness.is_some_and(|b| b >= done_at)
            })?;

            let Some(elapsed) = reached else {
                log::debug!("{}: transition {:.2}s never completed", device.id, target);
                continue;
            };
            let observed = (elapsed.as_secs_f64() - latency_ms / 1000.0).max(0.0);
            let ok = (observed - target).abs() <= target * TRANSITION_TOLERANCE;
            log::debug!(
                "{}: transition {:.2}s observed {:.3}s ({})",
                device.id,
                target,
                observed,
                if ok { "honoured" } else { "ignored" }
            );
            if ok {
                honoured.push(target);
            }
        }

        let min = honoured.iter().copied().min_by(f64::total_cmp);
        let max = honoured.iter().copied().max_by(f64::total_cmp);
        Ok((min, max))
    }

    /// Put the light back in the on/off state it was discovered in
    fn restore(&self, device: &LightDevice) {
        let service = if device.state.on { "turn_on" } else { "turn_off" };
        self.send(ServiceCall::new("light", service, &device.id));
    }

    /// Send a call; failures are logged and reported as `false`
    pub(super) fn send(&self, call: ServiceCall) -> bool {
        match self.api.call_service(&call) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "{}.{} for {} failed: {}",
                    call.domain,
                    call.service,
                    call.entity_id().unwrap_or("?"),
                    e
                );
                false
            }
        }
    }

    /// Sleep in poll-sized steps so cancellation is noticed quickly
    pub(super) fn sleep(&self, duration: Duration, token: &CancelToken) -> Result<()> {
        let step = self.config.poll_interval().max(Duration::from_millis(1));
        let end = Instant::now() + duration;
        loop {
            checkpoint(token)?;
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            thread::sleep(step.min(end - now));
        }
    }

    /// Poll until `pred` holds; returns the time since `start`, or `None` on timeout
    pub(super) fn wait_for(
        &self,
        entity_id: &str,
        start: Instant,
        timeout: Duration,
        token: &CancelToken,
        pred: impl Fn(&EntityState) -> bool,
    ) -> Result<Option<Duration>> {
        loop {
            checkpoint(token)?;
            match self.api.get_state(entity_id) {
                Ok(Some(state)) if pred(&state) => return Ok(Some(start.elapsed())),
                Ok(_) => {}
                Err(e) => log::debug!("get_state({}) failed: {}", entity_id, e),
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(self.config.poll_interval());
        }
    }
}

pub(super) fn checkpoint(token: &CancelToken) -> Result<()> {
    if token.is_cancelled() {
        Err(ShowError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedDeviceApi;
    use crate::model::{ColorMode, LightAttributes};

    fn fast_config() -> ProfilerConfig {
        ProfilerConfig {
            settle_ms: 5,
            poll_interval_ms: 2,
            timeout_ms: 300,
            transition_targets: vec![0.1, 0.2],
            ..Default::default()
        }
    }

    fn entity(id: &str) -> EntityState {
        EntityState {
            entity_id: id.to_string(),
            state: "off".to_string(),
            attributes: LightAttributes {
                supported_color_modes: vec![ColorMode::Brightness],
                ..Default::default()
            },
        }
    }

    fn device(api: &SimulatedDeviceApi, id: &str) -> LightDevice {
        let state = api.get_state(id).unwrap().unwrap();
        LightDevice::from_entity(&state).unwrap()
    }

    #[test]
    fn test_all_calls_fail_yields_default_profile() {
        let api = SimulatedDeviceApi::new(vec![entity("light.dead")]);
        let light = device(&api, "light.dead");
        let api = Arc::new(api.with_failing("light.dead"));

        let profiler = DeviceProfiler::new(api, fast_config());
        let profile = profiler.profile_device(&light, 3).unwrap();

        assert_eq!(profile.latency_ms, 250.0);
        assert_eq!(profile.calibration_method, CalibrationMethod::Auto);
        assert_eq!(profile.successful_samples, 0);
        assert_eq!(profile.failed_samples, 3);
        assert_eq!(profile.response_std_dev_ms, None);
        assert_eq!(profile.p99_response_ms, None);
        assert_eq!(profile.min_transition_s, None);
        assert_eq!(profile.max_transition_s, None);
    }

    #[test]
    fn test_measures_latency() {
        let api = SimulatedDeviceApi::new(vec![entity("light.a")])
            .with_latency("light.a", Duration::from_millis(30));
        let light = device(&api, "light.a");

        let profiler = DeviceProfiler::new(Arc::new(api), fast_config());
        let profile = profiler.profile_device(&light, 3).unwrap();

        assert_eq!(profile.successful_samples, 3);
        assert!(profile.latency_ms >= 30.0, "latency {}", profile.latency_ms);
        assert!(profile.latency_ms < 150.0, "latency {}", profile.latency_ms);
        assert!(profile.response_std_dev_ms.is_some());
        assert!(profile.p99_response_ms.unwrap() >= profile.latency_ms);
        assert_eq!(profile.max_transition_s, Some(0.2));
        assert!(profile.color_accuracy.is_none());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let api = SimulatedDeviceApi::new(vec![entity("light.a")]);
        let light = device(&api, "light.a");
        let profiler = DeviceProfiler::new(Arc::new(api), fast_config());
        assert!(matches!(
            profiler.profile_device(&light, 0),
            Err(ShowError::Input(_))
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let api = SimulatedDeviceApi::new(vec![entity("light.a")]);
        let light = device(&api, "light.a");
        let profiler = DeviceProfiler::new(Arc::new(api), fast_config());

        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            profiler.profile_with_cancel(&light, 5, &token),
            Err(ShowError::Cancelled)
        ));
    }

    #[test]
    fn test_cancel_mid_sequence() {
        let api = SimulatedDeviceApi::new(vec![entity("light.slow")])
            .with_latency("light.slow", Duration::from_secs(10));
        let light = device(&api, "light.slow");
        let profiler = DeviceProfiler::new(
            Arc::new(api),
            ProfilerConfig {
                timeout_ms: 5_000,
                ..fast_config()
            },
        );

        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let result = profiler.profile_with_cancel(&light, 3, &token);
        canceller.join().unwrap();

        assert!(matches!(result, Err(ShowError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_profile_all_keeps_order() {
        let api = SimulatedDeviceApi::new(vec![entity("light.a"), entity("light.b")]);
        let lights = vec![device(&api, "light.a"), device(&api, "light.b")];
        let profiler = DeviceProfiler::new(
            Arc::new(api),
            ProfilerConfig {
                transition_targets: Vec::new(),
                ..fast_config()
            },
        );

        let results = profiler.profile_all(&lights, 1);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "light.a");
        assert_eq!(results[1].0, "light.b");
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
