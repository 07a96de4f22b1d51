//! light-sync - audio-driven lighting shows
//!
//! This library analyzes an audio track, profiles smart lights for their
//! response latency, renders a per-light command timeline compensated for
//! those latencies and plays it back in real time.

pub mod analysis;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod playback;
pub mod profiler;
pub mod session;
pub mod store;
pub mod sync;
pub mod timeline;

pub use config::ShowConfig;
pub use error::{DeviceError, Result, ShowError};
pub use session::{PlaybackAction, RenderRequest, ShowSession};
