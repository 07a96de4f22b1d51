//! Beat emphasis pass

use crate::config::RenderSettings;
use crate::model::{CommandParams, CommandType, DeviceTrack, LightDevice, TimedCommand};

/// Strengthen every beat on one track
///
/// The nearest brightness-bearing command within the emphasis window is
/// boosted. When there is none, a short full-brightness flash is inserted at
/// the beat, after any commands already sharing its timestamp.
pub fn emphasize_beats(
    track: &DeviceTrack,
    beats: &[f64],
    device: &LightDevice,
    settings: &RenderSettings,
) -> DeviceTrack {
    let mut out = track.clone();
    let caps = &device.capabilities;
    if !caps.supports_brightness {
        return out;
    }
    let window = settings.emphasis_window_s;
    let mut boosted = 0usize;
    let mut flashes = 0usize;

    for &beat in beats {
        match nearest_with_brightness(&out.commands, beat, window) {
            Some(idx) => {
                let params = &mut out.commands[idx].params;
                if let Some(b) = params.brightness {
                    params.brightness =
                        Some(caps.clamp_brightness(b as f64 * settings.emphasis_boost));
                    boosted += 1;
                }
            }
            None => {
                let flash = TimedCommand::new(
                    beat,
                    CommandType::SetBrightness,
                    CommandParams {
                        brightness: Some(caps.brightness_range.1),
                        transition: Some(settings.flash_transition_s),
                        ..Default::default()
                    },
                );
                let at = out.commands.partition_point(|c| c.timestamp <= beat);
                out.commands.insert(at, flash);
                flashes += 1;
            }
        }
    }

    log::debug!(
        "{}: emphasis boosted {} commands, inserted {} flashes",
        device.id,
        boosted,
        flashes
    );
    out
}

/// Index of the closest command carrying a brightness within `window` of `beat`
fn nearest_with_brightness(commands: &[TimedCommand], beat: f64, window: f64) -> Option<usize> {
    let split = commands.partition_point(|c| c.timestamp < beat);
    let mut best: Option<(usize, f64)> = None;
    let mut consider = |idx: usize| {
        let distance = (commands[idx].timestamp - beat).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((idx, distance));
        }
    };

    for idx in (0..split).rev() {
        if beat - commands[idx].timestamp > window {
            break;
        }
        if commands[idx].params.brightness.is_some() {
            consider(idx);
            break;
        }
    }
    for idx in split..commands.len() {
        if commands[idx].timestamp - beat > window {
            break;
        }
        if commands[idx].params.brightness.is_some() {
            consider(idx);
            break;
        }
    }
    best.map(|(idx, _)| idx)
}
