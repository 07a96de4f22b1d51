use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Color modes a light may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Onoff,
    Brightness,
    ColorTemp,
    Hs,
    Xy,
    Rgb,
    Rgbw,
    Rgbww,
    White,
    #[serde(other)]
    Unknown,
}

impl ColorMode {
    /// Whether this mode can render arbitrary colors
    pub fn is_color(&self) -> bool {
        matches!(
            self,
            ColorMode::Hs | ColorMode::Xy | ColorMode::Rgb | ColorMode::Rgbw | ColorMode::Rgbww
        )
    }
}

/// Attributes reported by the device API
///
/// Every field is optional: lights report only what they support, and
/// callers check before use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,

    /// Current brightness 0-255
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u8; 3]>,

    /// Current color temperature in mireds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mireds: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mireds: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_color_modes: Vec<ColorMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_list: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// One entity as returned by `get_state` / `list_states`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,

    /// "on", "off", "unavailable", ...
    pub state: String,

    #[serde(default)]
    pub attributes: LightAttributes,
}

impl EntityState {
    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    /// Domain prefix of the entity id ("light" for "light.kitchen")
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }
}

/// What a light can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub supports_brightness: bool,
    pub supports_color: bool,
    pub supports_color_temp: bool,
    pub supports_effects: bool,

    /// Usable brightness range (inclusive)
    pub brightness_range: (u8, u8),

    /// Color temperature range in mireds (min, max)
    pub mireds_range: Option<(u32, u32)>,

    pub effects: Vec<String>,
    pub color_modes: Vec<ColorMode>,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            supports_brightness: false,
            supports_color: false,
            supports_color_temp: false,
            supports_effects: false,
            brightness_range: (1, 255),
            mireds_range: None,
            effects: Vec::new(),
            color_modes: Vec::new(),
        }
    }
}

impl DeviceCapabilities {
    /// Derive capabilities from reported attributes
    pub fn from_attributes(attrs: &LightAttributes) -> Self {
        let modes = &attrs.supported_color_modes;
        let supports_color = modes.iter().any(ColorMode::is_color);

        let mireds_range = match (attrs.min_mireds, attrs.max_mireds) {
            (Some(lo), Some(hi)) if lo > 0 && lo < hi => Some((lo, hi)),
            _ => None,
        };
        let supports_color_temp = modes.contains(&ColorMode::ColorTemp) || mireds_range.is_some();

        let supports_brightness = supports_color
            || supports_color_temp
            || modes.contains(&ColorMode::Brightness)
            || modes.contains(&ColorMode::White)
            || attrs.brightness.is_some();

        let effects = attrs.effect_list.clone().unwrap_or_default();

        Self {
            supports_brightness,
            supports_color,
            supports_color_temp,
            supports_effects: !effects.is_empty(),
            brightness_range: (1, 255),
            mireds_range: if supports_color_temp {
                mireds_range.or(Some((153, 500)))
            } else {
                None
            },
            effects,
            color_modes: modes.clone(),
        }
    }

    /// Kelvin range derived from the mireds range (min K, max K)
    pub fn kelvin_range(&self) -> Option<(u32, u32)> {
        self.mireds_range
            .map(|(lo, hi)| (1_000_000 / hi.max(1), 1_000_000 / lo.max(1)))
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Brightness => self.supports_brightness,
            Capability::Color => self.supports_color,
            Capability::ColorTemp => self.supports_color_temp,
            Capability::Effects => self.supports_effects,
        }
    }

    /// Clamp a brightness into the usable range
    pub fn clamp_brightness(&self, value: f64) -> u8 {
        let (lo, hi) = self.brightness_range;
        value.round().clamp(lo as f64, hi as f64) as u8
    }
}

/// Capability filter used by device scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Brightness,
    Color,
    ColorTemp,
    Effects,
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brightness" => Ok(Self::Brightness),
            "color" | "rgb" => Ok(Self::Color),
            "color_temp" | "colortemp" | "temperature" => Ok(Self::ColorTemp),
            "effects" | "effect" => Ok(Self::Effects),
            other => Err(format!("unknown capability: {}", other)),
        }
    }
}

/// Last known state of a light
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub on: bool,
    pub brightness: Option<u8>,
    pub rgb: Option<[u8; 3]>,
    pub color_temp: Option<u32>,
    pub effect: Option<String>,
}

/// A controllable light fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightDevice {
    /// Entity id, stable across scans
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub area: Option<String>,
    pub capabilities: DeviceCapabilities,
    pub state: DeviceState,
}

impl LightDevice {
    /// Build a device from a `light.*` entity; other domains yield `None`
    pub fn from_entity(entity: &EntityState) -> Option<Self> {
        if entity.domain() != "light" {
            return None;
        }
        let attrs = &entity.attributes;

        Some(Self {
            id: entity.entity_id.clone(),
            name: attrs
                .friendly_name
                .clone()
                .unwrap_or_else(|| entity.entity_id.clone()),
            manufacturer: attrs.manufacturer.clone(),
            model: attrs.model.clone(),
            area: attrs.area.clone(),
            capabilities: DeviceCapabilities::from_attributes(attrs),
            state: DeviceState {
                on: entity.is_on(),
                brightness: attrs.brightness,
                rgb: attrs.rgb_color,
                color_temp: attrs.color_temp,
                effect: attrs.effect.clone(),
            },
        })
    }

    /// Effect name suited to beat flashes, if the device has one
    pub fn flash_effect(&self) -> Option<&str> {
        const KEYWORDS: [&str; 4] = ["flash", "strobe", "fast", "blink"];
        if !self.capabilities.supports_effects {
            return None;
        }
        self.capabilities
            .effects
            .iter()
            .find(|name| {
                let lower = name.to_lowercase();
                KEYWORDS.iter().any(|k| lower.contains(k))
            })
            .map(String::as_str)
    }
}

impl fmt::Display for LightDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)?;
        if let Some((warm, cool)) = self.capabilities.kelvin_range() {
            write!(f, " {}-{}K", warm, cool)?;
        }
        Ok(())
    }
}
