//! Redundant command removal

use crate::config::SimilarityThresholds;
use crate::model::{CommandParams, RenderTimeline, TimedCommand};

/// Drop commands that repeat the previous kept command of their track
///
/// Each command is compared with the last command kept so far, so a second
/// pass over the result removes nothing. Returns the new timeline and the
/// number of commands removed.
pub fn optimize_timeline(
    timeline: &RenderTimeline,
    thresholds: &SimilarityThresholds,
) -> (RenderTimeline, usize) {
    let mut optimized = timeline.clone();
    let mut removed = 0usize;

    for track in &mut optimized.tracks {
        let before = track.commands.len();
        let mut kept: Vec<TimedCommand> = Vec::with_capacity(before);
        for cmd in track.commands.drain(..) {
            match kept.last() {
                Some(prev) if is_redundant(prev, &cmd, thresholds) => {}
                _ => kept.push(cmd),
            }
        }
        removed += before - kept.len();
        track.commands = kept;
    }

    optimized.metadata.command_count = optimized.command_count();
    optimized.metadata.optimized_removed += removed;
    log::info!(
        "Optimized timeline {}: removed {} of {} commands",
        timeline.id,
        removed,
        timeline.command_count()
    );
    (optimized, removed)
}

/// Whether `next` changes nothing visible compared with `prev`
pub fn is_redundant(prev: &TimedCommand, next: &TimedCommand, t: &SimilarityThresholds) -> bool {
    prev.command == next.command && params_similar(&prev.params, &next.params, t)
}

fn params_similar(a: &CommandParams, b: &CommandParams, t: &SimilarityThresholds) -> bool {
    let rgb = match (a.rgb, b.rgb) {
        (Some(x), Some(y)) => {
            let diff: u32 = x
                .iter()
                .zip(y.iter())
                .map(|(&p, &q)| (p as i32 - q as i32).unsigned_abs())
                .sum();
            diff < t.rgb_sum
        }
        (None, None) => true,
        _ => false,
    };
    let brightness = match (a.brightness, b.brightness) {
        (Some(x), Some(y)) => x.abs_diff(y) < t.brightness,
        (None, None) => true,
        _ => false,
    };
    let color_temp = match (a.color_temp, b.color_temp) {
        (Some(x), Some(y)) => x.abs_diff(y) < t.mireds,
        (None, None) => true,
        _ => false,
    };

    rgb && brightness && color_temp && a.effect == b.effect && a.transition == b.transition
}
