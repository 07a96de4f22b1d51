//! Data model shared by the profiler, generator and executor
//!
//! Devices and profiles describe the lights; timelines describe what to
//! send them and when.

mod device;
mod profile;
mod timeline;

pub use device::{
    Capability, ColorMode, DeviceCapabilities, DeviceState, EntityState, LightAttributes,
    LightDevice,
};
pub use profile::{CalibrationMethod, DeviceProfile, EffectPerformance, ProfileBook};
pub use timeline::{
    CommandParams, CommandType, DeviceTrack, RenderMetadata, RenderTimeline, ServiceCall,
    TimedCommand,
};
