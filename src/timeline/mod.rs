//! Timeline rendering
//!
//! Turns analysis results into per-light command tracks, applies beat
//! emphasis and latency compensation, removes redundant commands, and
//! exports/imports finished timelines.

mod color;
mod document;
mod emphasis;
mod generator;
mod optimize;

pub use color::{
    damp_color, frequency_color, hsl_to_rgb, mireds_for, mood_color, mood_hue, BrightnessCurve,
    GammaCurve, LinearCurve,
};
pub use document::{export_timeline, import_timeline, TimelineDocument, DOCUMENT_VERSION};
pub use emphasis::emphasize_beats;
pub use generator::{GenerateOptions, TimelineGenerator};
pub use optimize::{is_redundant, optimize_timeline};
