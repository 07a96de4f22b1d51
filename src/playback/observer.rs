//! Playback notifications

use std::sync::Mutex;

/// Something that happened during playback
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { timeline_id: String, position: f64 },
    Paused { position: f64 },
    Resumed { position: f64 },
    Seeked { position: f64 },
    Stopped { position: f64 },

    /// Position reached the end of the timeline
    Finished { timeline_id: String },

    CommandFailed {
        device_id: String,
        timestamp: f64,
        error: String,
    },
}

/// Receives playback events
///
/// Control events arrive in the order the operations happened; command
/// failures come from dispatch workers and may interleave with them.
pub trait PlaybackObserver: Send + Sync {
    fn on_event(&self, event: &PlaybackEvent);
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl PlaybackObserver for LogObserver {
    fn on_event(&self, event: &PlaybackEvent) {
        match event {
            PlaybackEvent::Started {
                timeline_id,
                position,
            } => log::info!("Playing timeline {} from {:.2}s", timeline_id, position),
            PlaybackEvent::Paused { position } => log::info!("Paused at {:.2}s", position),
            PlaybackEvent::Resumed { position } => log::info!("Resumed at {:.2}s", position),
            PlaybackEvent::Seeked { position } => log::info!("Seeked to {:.2}s", position),
            PlaybackEvent::Stopped { position } => log::info!("Stopped at {:.2}s", position),
            PlaybackEvent::Finished { timeline_id } => {
                log::info!("Timeline {} finished", timeline_id)
            }
            PlaybackEvent::CommandFailed {
                device_id,
                timestamp,
                error,
            } => log::warn!(
                "Command for {} at {:.3}s failed: {}",
                device_id,
                timestamp,
                error
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PlaybackEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl PlaybackObserver for RecordingObserver {
    fn on_event(&self, event: &PlaybackEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
