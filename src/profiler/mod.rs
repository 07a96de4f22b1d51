//! Device capability profiling
//!
//! Measures how fast each light reacts and what it can reliably do. The
//! profiler only talks to lights through [`crate::device::DeviceApi`], and a
//! light that fails every test still gets a profile built from defaults.

mod cancel;
mod device_profiler;
mod extended;
mod probe;
mod stats;

pub use cancel::CancelToken;
pub use device_profiler::DeviceProfiler;
pub use probe::{color_score, ColorProbe, ReportedColorProbe};
