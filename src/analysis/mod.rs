//! Audio analysis layer
//!
//! Decoded mono PCM goes through a windowed radix-2 FFT into per-frame
//! bass/mid/treble energies, then onset-based beat detection, tempo
//! estimation and mood classification. Analysis can run over a whole buffer
//! or progressively over chunks; both produce the same [`AudioFeatures`].

mod beats;
mod decode;
mod fft;
mod mood;
mod spectral;
mod stream;
mod types;

pub use beats::{detect_beats, estimate_tempo, onset_strength};
pub use decode::{decode_file, resample_linear};
pub use fft::{hamming_window, Radix2Fft};
pub use mood::classify_mood;
pub use spectral::{FrameProcessor, SpectralAnalyzer};
pub use stream::StreamingAnalyzer;
pub use types::{band_means, AudioBuffer, AudioFeatures, Band, FrequencySlice, Mood};
