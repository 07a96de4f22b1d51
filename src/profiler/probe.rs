//! Color measurement hook

use crate::device::DeviceApi;
use crate::model::LightDevice;

/// Measures the color a light actually shows
///
/// A camera-backed implementation can replace the default, which trusts the
/// color the device reports.
pub trait ColorProbe: Send + Sync {
    /// Observed RGB, or `None` when no measurement was possible
    fn measure(&self, api: &dyn DeviceApi, device: &LightDevice) -> Option<[u8; 3]>;
}

/// Reads `rgb_color` from the device state
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportedColorProbe;

impl ColorProbe for ReportedColorProbe {
    fn measure(&self, api: &dyn DeviceApi, device: &LightDevice) -> Option<[u8; 3]> {
        match api.get_state(&device.id) {
            Ok(Some(state)) => state.attributes.rgb_color,
            Ok(None) => None,
            Err(e) => {
                log::debug!("Color probe failed for {}: {}", device.id, e);
                None
            }
        }
    }
}

/// Score in [0,1]: one minus the summed channel error over its maximum
pub fn color_score(target: [u8; 3], observed: [u8; 3]) -> f64 {
    let diff: u32 = target
        .iter()
        .zip(observed.iter())
        .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs())
        .sum();
    1.0 - diff as f64 / 765.0
}
