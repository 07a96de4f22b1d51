use crate::analysis::AudioFeatures;
use crate::config::RenderSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of command sent to a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    TurnOn,
    TurnOff,
    SetColor,
    SetBrightness,
    SetColorTemp,
    Effect,
}

impl CommandType {
    pub fn name(&self) -> &'static str {
        match self {
            CommandType::TurnOn => "turn_on",
            CommandType::TurnOff => "turn_off",
            CommandType::SetColor => "set_color",
            CommandType::SetBrightness => "set_brightness",
            CommandType::SetColorTemp => "set_color_temp",
            CommandType::Effect => "effect",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Command parameters; only the relevant fields are set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<[u8; 3]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,

    /// Mireds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<f64>,
}

/// Service invocation derived from a command
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Map<String, Value>,
}

impl ServiceCall {
    pub fn new(domain: &str, service: &str, entity_id: &str) -> Self {
        let mut data = Map::new();
        data.insert("entity_id".to_string(), Value::from(entity_id));
        Self {
            domain: domain.to_string(),
            service: service.to_string(),
            data,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(Value::as_str)
    }
}

/// One command at a point on the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedCommand {
    /// Seconds from track start, after compensation
    pub timestamp: f64,

    pub command: CommandType,

    #[serde(default)]
    pub params: CommandParams,

    /// Timestamp before compensation, when it was shifted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_timestamp: Option<f64>,
}

impl TimedCommand {
    pub fn new(timestamp: f64, command: CommandType, params: CommandParams) -> Self {
        Self {
            timestamp,
            command,
            params,
            original_timestamp: None,
        }
    }

    pub fn turn_on(timestamp: f64) -> Self {
        Self::new(timestamp, CommandType::TurnOn, CommandParams::default())
    }

    pub fn turn_off(timestamp: f64) -> Self {
        Self::new(timestamp, CommandType::TurnOff, CommandParams::default())
    }

    /// Timestamp the command was authored at
    pub fn scheduled_for(&self) -> f64 {
        self.original_timestamp.unwrap_or(self.timestamp)
    }

    /// Map to a `light.turn_on` / `light.turn_off` call for `entity_id`
    pub fn service_call(&self, entity_id: &str) -> ServiceCall {
        if self.command == CommandType::TurnOff {
            let call = ServiceCall::new("light", "turn_off", entity_id);
            return match self.params.transition {
                Some(t) => call.with("transition", t),
                None => call,
            };
        }

        let p = &self.params;
        let mut call = ServiceCall::new("light", "turn_on", entity_id);
        if let Some(rgb) = p.rgb {
            call = call.with("rgb_color", rgb.to_vec());
        }
        if let Some(b) = p.brightness {
            call = call.with("brightness", b);
        }
        if let Some(m) = p.color_temp {
            call = call.with("color_temp", m);
        }
        if let Some(effect) = &p.effect {
            call = call.with("effect", effect.as_str());
        }
        if let Some(t) = p.transition {
            call = call.with("transition", t);
        }
        call
    }
}

/// Commands for one light
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTrack {
    pub device_id: String,
    pub device_name: String,

    /// How far this track was shifted earlier (ms)
    #[serde(default)]
    pub compensation_ms: f64,

    pub commands: Vec<TimedCommand>,
}

impl DeviceTrack {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            compensation_ms: 0.0,
            commands: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether timestamps never decrease
    pub fn is_ordered(&self) -> bool {
        self.commands
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

/// Render bookkeeping stored alongside a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderMetadata {
    pub settings: RenderSettings,
    pub device_count: usize,
    pub command_count: usize,
    pub processing_time_ms: f64,
    pub generated_at: DateTime<Utc>,

    /// Per-device compensation (ms)
    #[serde(default)]
    pub compensation: BTreeMap<String, f64>,

    /// Commands removed by optimization
    #[serde(default)]
    pub optimized_removed: usize,
}

/// A rendered light show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTimeline {
    pub id: String,
    pub name: String,

    /// Audio file the show was rendered from
    pub audio_ref: String,

    pub features: AudioFeatures,

    /// Seconds
    pub duration: f64,

    pub tracks: Vec<DeviceTrack>,
    pub metadata: RenderMetadata,
}

impl RenderTimeline {
    /// Stable id from the audio reference, device set and generation time
    pub fn make_id(audio_ref: &str, device_ids: &[&str], generated_at: &DateTime<Utc>) -> String {
        let key = format!(
            "{}|{}|{}",
            audio_ref,
            device_ids.join(","),
            generated_at.timestamp_nanos_opt().unwrap_or_default()
        );
        format!("{:x}", md5::compute(key.as_bytes()))
    }

    pub fn command_count(&self) -> usize {
        self.tracks.iter().map(DeviceTrack::len).sum()
    }

    pub fn track(&self, device_id: &str) -> Option<&DeviceTrack> {
        self.tracks.iter().find(|t| t.device_id == device_id)
    }

    pub fn device_ids(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.device_id.as_str()).collect()
    }
}
