//! Audio file decoding using symphonia
//!
//! Decodes any supported container to mono f32 samples by averaging channels.

use super::types::AudioBuffer;
use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode an audio file into a mono [`AudioBuffer`]
pub fn decode_file(path: &Path) -> Result<AudioBuffer> {
    log::debug!("Decoding audio file: {:?}", path);

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {:?}", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Unsupported or corrupt audio file: {:?}", path))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("No sample rate in audio track")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("Error reading packet: {:?}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("Audio decoding failed"),
        };

        let spec = *decoded.spec();
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);

        let channels = spec.channels.count().max(1);
        if channels > 1 {
            mono.extend(
                buf.samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            mono.extend_from_slice(buf.samples());
        }
    }

    log::debug!(
        "Decoded {} samples ({:.1}s) at {}Hz",
        mono.len(),
        mono.len() as f64 / sample_rate as f64,
        sample_rate
    );

    if mono.is_empty() {
        anyhow::bail!("Audio file contains no samples: {:?}", path);
    }

    Ok(AudioBuffer::new(mono, sample_rate)?)
}

/// Linear-interpolation resampling to `target_rate`
///
/// Returns the input unchanged when the rates already match.
pub fn resample_linear(buffer: &AudioBuffer, target_rate: u32) -> crate::error::Result<AudioBuffer> {
    if target_rate == buffer.sample_rate() {
        return Ok(buffer.clone());
    }
    if target_rate == 0 {
        return Err(crate::error::ShowError::input("target sample rate must be greater than zero"));
    }

    let src = buffer.samples();
    let ratio = buffer.sample_rate() as f64 / target_rate as f64;
    let out_len = (src.len() as f64 / ratio).floor() as usize;

    let out = (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = src.get(idx).copied().unwrap_or(0.0);
            let b = src.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect();

    AudioBuffer::new(out, target_rate)
}
