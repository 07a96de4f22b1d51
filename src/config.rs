//! Show configuration
//!
//! Every tunable constant of the pipeline lives here with its default. The
//! structs are plain data: builders on [`ShowConfig`] and the CLI flags
//! override individual fields.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a whole show session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfig {
    /// Spectral analysis parameters
    pub analysis: AnalysisSettings,

    /// Device profiling parameters
    pub profiler: ProfilerConfig,

    /// Timeline rendering parameters
    pub render: RenderSettings,

    /// Playback scheduler parameters
    pub executor: ExecutorConfig,

    /// Manufacturer latency estimates for unprofiled devices
    pub latency: LatencyEstimates,

    /// Thresholds used by timeline optimization
    pub similarity: SimilarityThresholds,

    /// A profile older than this many days is stale
    #[serde(default = "default_reprofile_days")]
    pub reprofile_interval_days: i64,
}

fn default_reprofile_days() -> i64 {
    7
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisSettings::default(),
            profiler: ProfilerConfig::default(),
            render: RenderSettings::default(),
            executor: ExecutorConfig::default(),
            latency: LatencyEstimates::default(),
            similarity: SimilarityThresholds::default(),
            reprofile_interval_days: default_reprofile_days(),
        }
    }
}

impl ShowConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set FFT and hop size
    pub fn with_fft(mut self, fft_size: usize, hop_size: usize) -> Self {
        self.analysis.fft_size = fft_size;
        self.analysis.hop_size = hop_size;
        self
    }

    /// Set render settings
    pub fn with_render(mut self, render: RenderSettings) -> Self {
        self.render = render;
        self
    }

    /// Set profiler configuration
    pub fn with_profiler(mut self, profiler: ProfilerConfig) -> Self {
        self.profiler = profiler;
        self
    }

    /// Set executor configuration
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set the re-profiling interval in days
    pub fn with_reprofile_interval(mut self, days: i64) -> Self {
        self.reprofile_interval_days = days;
        self
    }
}

/// Spectral analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// FFT window size in samples (power of two)
    pub fft_size: usize,

    /// Stride between analysis frames in samples
    pub hop_size: usize,

    /// Scale applied to summed band magnitudes before clamping to [0,1]
    pub band_scale: f32,

    /// Scale applied to the summed spectrum for frame amplitude
    pub amplitude_scale: f32,

    /// Beat detection parameters
    pub beat: BeatSettings,

    /// Mood classification thresholds
    pub mood: MoodThresholds,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            band_scale: 2.0,
            amplitude_scale: 2.0,
            beat: BeatSettings::default(),
            mood: MoodThresholds::default(),
        }
    }
}

/// Onset and tempo parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatSettings {
    /// Onset must exceed this multiple of the mean onset strength
    pub threshold_ratio: f32,

    /// Weight of the mid band delta in the onset function
    pub mid_weight: f32,

    /// Minimum spacing between accepted beats (seconds)
    pub min_interval: f64,

    pub min_bpm: f64,
    pub max_bpm: f64,

    /// Tempo reported when fewer than two beats are found
    pub default_bpm: f64,
}

impl Default for BeatSettings {
    fn default() -> Self {
        Self {
            threshold_ratio: 1.5,
            mid_weight: 0.5,
            min_interval: 0.3,
            min_bpm: 60.0,
            max_bpm: 200.0,
            default_bpm: 120.0,
        }
    }
}

/// Decision table thresholds for mood classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodThresholds {
    pub intense_energy: f32,
    pub intense_bpm: f64,
    pub energetic_energy: f32,
    pub energetic_bpm: f64,
    pub dramatic_energy: f32,
    pub ambient_energy: f32,
    pub ambient_bpm: f64,
}

impl Default for MoodThresholds {
    fn default() -> Self {
        Self {
            intense_energy: 0.6,
            intense_bpm: 130.0,
            energetic_energy: 0.4,
            energetic_bpm: 110.0,
            dramatic_energy: 0.25,
            ambient_energy: 0.1,
            ambient_bpm: 100.0,
        }
    }
}

/// Device profiling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Wait after forcing a device off before the measured command
    pub settle_ms: u64,

    /// State polling period
    pub poll_interval_ms: u64,

    /// Give up waiting for a state change after this long
    pub timeout_ms: u64,

    /// Requested transition durations to test (seconds)
    pub transition_targets: Vec<f64>,

    /// Run effect, linearity and color tests when capabilities allow
    pub extended: bool,

    /// Latency reported when no sample succeeds
    pub default_latency_ms: f64,

    /// Upper bound on effects exercised per device
    pub max_effects: usize,

    /// Default iteration count when the caller gives none
    pub default_iterations: u32,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            poll_interval_ms: 20,
            timeout_ms: 2000,
            transition_targets: vec![0.5, 1.0, 2.0],
            extended: false,
            default_latency_ms: 250.0,
            max_effects: 5,
            default_iterations: 5,
        }
    }
}

impl ProfilerConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How slice energies become colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMapping {
    /// bass to red, mid to green, treble to blue
    Frequency,
    /// hue chosen by the track mood
    Mood,
}

impl FromStr for ColorMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "frequency" | "freq" => Ok(Self::Frequency),
            "mood" => Ok(Self::Mood),
            other => Err(format!("unknown color mapping: {}", other)),
        }
    }
}

/// Timeline rendering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Overall intensity in [0,1]
    pub intensity: f64,

    pub color_mapping: ColorMapping,

    /// Emphasize beats with effects, boosts and flashes
    pub beat_sync: bool,

    /// Request device-side transitions between commands
    pub smooth_transitions: bool,

    /// Minimum spacing between two commands for the same device
    pub min_command_interval_ms: f64,

    /// A slice this close to a beat is treated as on-beat (seconds)
    pub beat_window_s: f64,

    /// Beat emphasis boosts commands this close to a beat (seconds)
    pub emphasis_window_s: f64,

    /// Brightness multiplier for on-beat slices without an effect
    pub beat_boost: f64,

    /// Brightness multiplier applied by the beat emphasis pass
    pub emphasis_boost: f64,

    /// Transition of inserted flash commands (seconds)
    pub flash_transition_s: f64,

    /// Damp colors by the profiled color accuracy
    pub use_color_accuracy: bool,

    /// Shift tracks by per-device latency compensation
    pub apply_compensation: bool,

    /// Run the redundancy pass after rendering
    pub optimize: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            intensity: 0.8,
            color_mapping: ColorMapping::Frequency,
            beat_sync: true,
            smooth_transitions: true,
            min_command_interval_ms: 100.0,
            beat_window_s: 0.05,
            emphasis_window_s: 0.1,
            beat_boost: 1.2,
            emphasis_boost: 1.3,
            flash_transition_s: 0.05,
            use_color_accuracy: true,
            apply_compensation: true,
            optimize: false,
        }
    }
}

/// Playback scheduler parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Tick period (about 60 Hz by default)
    pub tick_interval_ms: u64,

    /// How far ahead of the playback position commands are materialized
    pub lookahead_s: f64,

    /// Hard cap on materialized commands
    pub max_queue: usize,

    /// Threads performing device calls
    pub dispatch_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            lookahead_s: 2.0,
            max_queue: 5000,
            dispatch_workers: 4,
        }
    }
}

impl ExecutorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Latency estimates keyed by manufacturer keywords
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyEstimates {
    pub fast_ms: f64,
    pub medium_ms: f64,
    pub slow_ms: f64,
    pub unknown_ms: f64,
    pub fast_keywords: Vec<String>,
    pub medium_keywords: Vec<String>,
    pub slow_keywords: Vec<String>,
}

impl Default for LatencyEstimates {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            fast_ms: 65.0,
            medium_ms: 135.0,
            slow_ms: 275.0,
            unknown_ms: 200.0,
            fast_keywords: words(&["lifx", "nanoleaf", "wled"]),
            medium_keywords: words(&["philips", "signify", "hue", "ikea", "tradfri"]),
            slow_keywords: words(&["tuya", "smart life", "yeelight", "sengled"]),
        }
    }
}

/// Thresholds below which two consecutive commands count as identical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityThresholds {
    /// Summed absolute RGB channel difference (out of 765)
    pub rgb_sum: u32,

    /// Brightness difference (out of 255)
    pub brightness: u8,

    /// Color temperature difference in mireds
    pub mireds: u32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            rgb_sum: 15,
            brightness: 5,
            mireds: 5,
        }
    }
}
