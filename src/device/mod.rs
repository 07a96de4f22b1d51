//! Access to the smart-home device API
//!
//! The API itself is an external collaborator behind [`DeviceApi`]. This
//! module adds discovery on top of it and an in-process simulation.

mod api;
mod scan;
mod simulated;

pub use api::DeviceApi;
pub use scan::{find_device, scan_devices};
pub use simulated::SimulatedDeviceApi;
