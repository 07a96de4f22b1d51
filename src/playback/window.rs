//! Bounded lookahead window over a timeline
//!
//! Only commands due within `lookahead` seconds of the playback position are
//! materialized, and never more than `cap` of them. A k-way merge over
//! per-track cursors yields commands in timestamp order, ties broken by track
//! then command index, which matches a stable sort of all tracks.

use crate::model::RenderTimeline;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

/// A materialized command reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedCommand {
    pub track: usize,
    pub index: usize,
    pub timestamp: f64,
}

impl Eq for QueuedCommand {}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then(self.track.cmp(&other.track))
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct LookaheadWindow {
    /// Next unmaterialized candidate of each non-exhausted track
    heads: BinaryHeap<Reverse<QueuedCommand>>,
    queue: VecDeque<QueuedCommand>,
    lookahead: f64,
    cap: usize,
    total: usize,
    unmaterialized: usize,
}

impl LookaheadWindow {
    /// Window over every command at or after `start`
    pub fn new(timeline: &RenderTimeline, start: f64, lookahead: f64, cap: usize) -> Self {
        let mut heads = BinaryHeap::with_capacity(timeline.tracks.len());
        let mut total = 0;

        for (track_idx, track) in timeline.tracks.iter().enumerate() {
            let first = track.commands.partition_point(|c| c.timestamp < start);
            total += track.commands.len() - first;
            if let Some(cmd) = track.commands.get(first) {
                heads.push(Reverse(QueuedCommand {
                    track: track_idx,
                    index: first,
                    timestamp: cmd.timestamp,
                }));
            }
        }

        Self {
            heads,
            queue: VecDeque::new(),
            lookahead: lookahead.max(0.0),
            cap: cap.max(1),
            total,
            unmaterialized: total,
        }
    }

    /// Materialize commands up to `position + lookahead`; returns how many were added
    pub fn refill(&mut self, timeline: &RenderTimeline, position: f64) -> usize {
        let horizon = position + self.lookahead;
        let mut added = 0;

        while self.queue.len() < self.cap {
            let next = match self.heads.peek() {
                Some(Reverse(head)) if head.timestamp <= horizon => *head,
                _ => break,
            };
            self.heads.pop();
            self.queue.push_back(next);
            self.unmaterialized -= 1;
            added += 1;

            let following = next.index + 1;
            if let Some(cmd) = timeline.tracks[next.track].commands.get(following) {
                self.heads.push(Reverse(QueuedCommand {
                    track: next.track,
                    index: following,
                    timestamp: cmd.timestamp,
                }));
            }
        }
        added
    }

    /// Remove and return every materialized command due at `position`
    pub fn pop_due(&mut self, position: f64) -> Vec<QueuedCommand> {
        let mut due = Vec::new();
        while self.queue.front().is_some_and(|q| q.timestamp <= position) {
            if let Some(q) = self.queue.pop_front() {
                due.push(q);
            }
        }
        due
    }

    /// Materialized commands
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Commands at or after the start position when the window was built
    pub fn total(&self) -> usize {
        self.total
    }

    /// Commands not yet materialized
    pub fn remaining(&self) -> usize {
        self.unmaterialized
    }

    /// Whether every command has been materialized and handed out
    pub fn is_exhausted(&self) -> bool {
        self.heads.is_empty() && self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.heads.clear();
        self.queue.clear();
        self.unmaterialized = 0;
    }
}
