//! In-process device API
//!
//! Models per-light latency (a command becomes visible only after the
//! light's latency has elapsed), linear brightness transitions, imperfect
//! color reproduction and injected failures. Used by tests and by the CLI
//! when no controller is attached.

use super::DeviceApi;
use crate::error::DeviceError;
use crate::model::{EntityState, ServiceCall};
use anyhow::Context;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Ramp {
    from: f64,
    to: f64,
    start: Instant,
    duration: Duration,
}

impl Ramp {
    fn value_at(&self, now: Instant) -> u8 {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        let total = self.duration.as_secs_f64();
        let progress = if total <= 0.0 {
            1.0
        } else {
            (elapsed / total).min(1.0)
        };
        (self.from + (self.to - self.from) * progress)
            .round()
            .clamp(0.0, 255.0) as u8
    }

    fn finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= self.duration
    }
}

#[derive(Debug, Clone)]
enum Change {
    Off,
    On {
        brightness: Option<u8>,
        rgb: Option<[u8; 3]>,
        color_temp: Option<u32>,
        effect: Option<String>,
        transition: f64,
    },
}

#[derive(Debug)]
struct SimLight {
    entity: EntityState,
    latency: Duration,
    failing: bool,
    color_fidelity: f64,
    ramp: Option<Ramp>,
    pending: VecDeque<(Instant, Change)>,
}

impl SimLight {
    fn brightness_at(&self, now: Instant) -> u8 {
        match &self.ramp {
            Some(ramp) => ramp.value_at(now),
            None => self.entity.attributes.brightness.unwrap_or(0),
        }
    }

    /// Apply every change that has become visible by `now`
    fn settle(&mut self, now: Instant) {
        while self.pending.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((at, change)) = self.pending.pop_front() {
                self.apply(at, change);
            }
        }
        if let Some(ramp) = &self.ramp {
            if ramp.finished(now) {
                self.entity.attributes.brightness = Some(ramp.value_at(now));
                self.ramp = None;
            }
        }
    }

    fn apply(&mut self, at: Instant, change: Change) {
        let attrs = &mut self.entity.attributes;
        match change {
            Change::Off => {
                self.entity.state = "off".to_string();
                attrs.brightness = None;
                attrs.effect = None;
                self.ramp = None;
            }
            Change::On {
                brightness,
                rgb,
                color_temp,
                effect,
                transition,
            } => {
                let current = match &self.ramp {
                    Some(ramp) => ramp.value_at(at),
                    None => attrs.brightness.unwrap_or(0),
                };
                self.entity.state = "on".to_string();
                let target = brightness.unwrap_or(if current == 0 { 255 } else { current });
                if transition > 0.0 {
                    attrs.brightness = Some(current);
                    self.ramp = Some(Ramp {
                        from: current as f64,
                        to: target as f64,
                        start: at,
                        duration: Duration::from_secs_f64(transition),
                    });
                } else {
                    attrs.brightness = Some(target);
                    self.ramp = None;
                }
                if let Some(rgb) = rgb {
                    attrs.rgb_color = Some(distort(rgb, self.color_fidelity));
                }
                if color_temp.is_some() {
                    attrs.color_temp = color_temp;
                }
                if effect.is_some() {
                    attrs.effect = effect;
                }
            }
        }
    }

    fn snapshot(&self, now: Instant) -> EntityState {
        let mut entity = self.entity.clone();
        if self.ramp.is_some() {
            entity.attributes.brightness = Some(self.brightness_at(now));
        }
        entity
    }
}

/// Pull reported color toward grey by `1 - fidelity`
fn distort(rgb: [u8; 3], fidelity: f64) -> [u8; 3] {
    let grey = rgb.iter().map(|&c| c as f64).sum::<f64>() / 3.0;
    rgb.map(|c| (grey + (c as f64 - grey) * fidelity).round().clamp(0.0, 255.0) as u8)
}

fn parse_change(call: &ServiceCall) -> Result<Change, DeviceError> {
    let data = &call.data;
    match call.service.as_str() {
        "turn_off" => Ok(Change::Off),
        "turn_on" => {
            let brightness = data
                .get("brightness")
                .and_then(Value::as_u64)
                .map(|b| b.min(255) as u8);
            let rgb = data.get("rgb_color").and_then(Value::as_array).and_then(|a| {
                let channels: Vec<u8> = a
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(|c| c.min(255) as u8)
                    .collect();
                <[u8; 3]>::try_from(channels).ok()
            });
            let color_temp = data
                .get("color_temp")
                .and_then(Value::as_u64)
                .map(|m| m as u32);
            let effect = data
                .get("effect")
                .and_then(Value::as_str)
                .map(str::to_string);
            let transition = data
                .get("transition")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0);
            Ok(Change::On {
                brightness,
                rgb,
                color_temp,
                effect,
                transition,
            })
        }
        other => Err(DeviceError::Rejected {
            service: format!("{}.{}", call.domain, other),
            reason: "unsupported service".to_string(),
        }),
    }
}

/// Simulated home controller holding a set of lights
#[derive(Debug)]
pub struct SimulatedDeviceApi {
    lights: Mutex<HashMap<String, SimLight>>,
    order: Vec<String>,
    calls: Mutex<Vec<ServiceCall>>,
    offline: bool,
}

impl SimulatedDeviceApi {
    /// Create from entity states; every light starts with zero latency
    pub fn new(states: Vec<EntityState>) -> Self {
        let order = states.iter().map(|s| s.entity_id.clone()).collect();
        let lights = states
            .into_iter()
            .map(|entity| {
                (
                    entity.entity_id.clone(),
                    SimLight {
                        entity,
                        latency: Duration::ZERO,
                        failing: false,
                        color_fidelity: 1.0,
                        ramp: None,
                        pending: VecDeque::new(),
                    },
                )
            })
            .collect();

        Self {
            lights: Mutex::new(lights),
            order,
            calls: Mutex::new(Vec::new()),
            offline: false,
        }
    }

    /// Load entity states from a JSON array file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device states: {:?}", path))?;
        let states: Vec<EntityState> = serde_json::from_str(&text)
            .with_context(|| format!("Invalid device states JSON: {:?}", path))?;
        log::debug!("Loaded {} simulated entities from {:?}", states.len(), path);
        Ok(Self::new(states))
    }

    /// Delay before a light reports a commanded change
    pub fn with_latency(self, entity_id: &str, latency: Duration) -> Self {
        self.update(entity_id, |light| light.latency = latency);
        self
    }

    /// Make every call for this light fail
    pub fn with_failing(self, entity_id: &str) -> Self {
        self.update(entity_id, |light| light.failing = true);
        self
    }

    /// Fraction of commanded saturation the light reproduces (0-1)
    pub fn with_color_fidelity(self, entity_id: &str, fidelity: f64) -> Self {
        let fidelity = fidelity.clamp(0.0, 1.0);
        self.update(entity_id, |light| light.color_fidelity = fidelity);
        self
    }

    /// Make every API call fail
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Set the latency of a light after construction
    pub fn set_latency(&self, entity_id: &str, latency: Duration) {
        self.update(entity_id, |light| light.latency = latency);
    }

    /// Service calls accepted so far, in arrival order
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn update(&self, entity_id: &str, f: impl FnOnce(&mut SimLight)) {
        if let Ok(mut lights) = self.lights.lock() {
            if let Some(light) = lights.get_mut(entity_id) {
                f(light);
            }
        }
    }

    fn check_online(&self) -> Result<(), DeviceError> {
        if self.offline {
            Err(DeviceError::Unavailable("simulated controller offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl DeviceApi for SimulatedDeviceApi {
    fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>, DeviceError> {
        self.check_online()?;
        let now = Instant::now();
        let mut lights = self
            .lights
            .lock()
            .map_err(|_| DeviceError::Unavailable("state lock poisoned".to_string()))?;

        match lights.get_mut(entity_id) {
            Some(light) if light.failing => Err(DeviceError::Unavailable(format!(
                "{} not responding",
                entity_id
            ))),
            Some(light) => {
                light.settle(now);
                Ok(Some(light.snapshot(now)))
            }
            None => Ok(None),
        }
    }

    fn call_service(&self, call: &ServiceCall) -> Result<(), DeviceError> {
        self.check_online()?;
        let service = format!("{}.{}", call.domain, call.service);
        let entity_id = call.entity_id().ok_or_else(|| DeviceError::Rejected {
            service: service.clone(),
            reason: "missing entity_id".to_string(),
        })?;

        let change = parse_change(call)?;
        let now = Instant::now();
        {
            let mut lights = self
                .lights
                .lock()
                .map_err(|_| DeviceError::Unavailable("state lock poisoned".to_string()))?;
            let light = lights.get_mut(entity_id).ok_or_else(|| DeviceError::Rejected {
                service: service.clone(),
                reason: format!("unknown entity {}", entity_id),
            })?;
            if light.failing {
                return Err(DeviceError::Unavailable(format!(
                    "{} not responding",
                    entity_id
                )));
            }
            light.settle(now);
            let visible_at = now + light.latency;
            light.pending.push_back((visible_at, change));
        }

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        Ok(())
    }

    fn list_states(&self) -> Result<Vec<EntityState>, DeviceError> {
        self.check_online()?;
        let now = Instant::now();
        let mut lights = self
            .lights
            .lock()
            .map_err(|_| DeviceError::Unavailable("state lock poisoned".to_string()))?;

        Ok(self
            .order
            .iter()
            .filter_map(|id| {
                lights.get_mut(id).map(|light| {
                    light.settle(now);
                    light.snapshot(now)
                })
            })
            .collect())
    }
}
