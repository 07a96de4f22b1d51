//! Light discovery

use super::DeviceApi;
use crate::error::{Result, ShowError};
use crate::model::{Capability, LightDevice};

/// List lights, optionally filtered by area and capability
///
/// Area matching ignores case. Results are sorted by id so repeated scans
/// line up.
pub fn scan_devices(
    api: &dyn DeviceApi,
    area: Option<&str>,
    capability: Option<Capability>,
) -> Result<Vec<LightDevice>> {
    let states = api.list_states()?;
    log::debug!("Scanning {} entities", states.len());

    let mut devices: Vec<LightDevice> = states
        .iter()
        .filter_map(LightDevice::from_entity)
        .filter(|d| match area {
            Some(wanted) => d
                .area
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(wanted)),
            None => true,
        })
        .filter(|d| capability.map_or(true, |c| d.capabilities.has(c)))
        .collect();
    devices.sort_by(|a, b| a.id.cmp(&b.id));

    log::info!("Found {} lights", devices.len());
    Ok(devices)
}

/// Look up one light by entity id
pub fn find_device(api: &dyn DeviceApi, id: &str) -> Result<LightDevice> {
    api.get_state(id)?
        .as_ref()
        .and_then(LightDevice::from_entity)
        .ok_or_else(|| ShowError::UnknownDevice(id.to_string()))
}
