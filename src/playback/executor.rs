//! Real-time timeline playback
//!
//! The executor owns its queue and lifecycle state behind one mutex. A
//! [`Ticker`] calls [`TimelineExecutor::tick`], which advances the lookahead
//! window to the clock position and hands every due command to the
//! [`Dispatcher`]. Control operations are serialized by a second lock that
//! the tick never takes.

use crate::config::ExecutorConfig;
use crate::device::DeviceApi;
use crate::error::{Result, ShowError};
use crate::model::RenderTimeline;
use crate::playback::clock::{Clock, SystemClock};
use crate::playback::dispatch::Dispatcher;
use crate::playback::observer::{LogObserver, PlaybackEvent, PlaybackObserver};
use crate::playback::ticker::{ThreadTicker, TickFn, Ticker};
use crate::playback::window::LookaheadWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Lifecycle of an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counts over the current run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Commands at or after the start position of the current window
    pub total_queued: usize,

    /// Materialized commands waiting for their time
    pub pending: usize,

    /// Commands not yet materialized
    pub remaining: usize,

    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub average_latency_ms: f64,
}

/// Snapshot returned by [`TimelineExecutor::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub state: PlaybackState,
    pub position: f64,
    pub timeline_id: Option<String>,
    pub stats: QueueStats,
}

struct Core {
    state: PlaybackState,
    timeline: Option<Arc<RenderTimeline>>,
    window: Option<LookaheadWindow>,
    /// Clock reading at which `anchor_position` was valid
    anchor: Duration,
    anchor_position: f64,
    position: f64,
}

impl Core {
    fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            timeline: None,
            window: None,
            anchor: Duration::ZERO,
            anchor_position: 0.0,
            position: 0.0,
        }
    }

    fn live_position(&self, now: Duration) -> f64 {
        self.anchor_position + now.saturating_sub(self.anchor).as_secs_f64()
    }
}

struct Shared {
    core: Mutex<Core>,
    control: Mutex<()>,
    ticking: AtomicBool,
    clock: Arc<dyn Clock>,
    ticker: Arc<dyn Ticker>,
    observer: Arc<dyn PlaybackObserver>,
    dispatcher: Dispatcher,
    config: ExecutorConfig,
}

/// Clears the tick flag when a tick returns
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(&self) {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _guard = TickGuard(&self.ticking);

        let finished = {
            let mut core = self.core();
            if core.state != PlaybackState::Playing {
                return;
            }
            let Some(timeline) = core.timeline.clone() else {
                return;
            };

            let position = core.live_position(self.clock.now());
            core.position = position.min(timeline.duration);

            if let Some(window) = core.window.as_mut() {
                loop {
                    window.refill(&timeline, position);
                    let due = window.pop_due(position);
                    if due.is_empty() {
                        break;
                    }
                    for queued in due {
                        let track = &timeline.tracks[queued.track];
                        let command = &track.commands[queued.index];
                        self.dispatcher.submit(
                            &track.device_id,
                            command.timestamp,
                            command.service_call(&track.device_id),
                            self.observer.clone(),
                        );
                    }
                }
            }

            if position >= timeline.duration {
                core.state = PlaybackState::Stopped;
                if let Some(window) = core.window.as_mut() {
                    window.clear();
                }
                self.ticker.stop();
                Some(timeline.id.clone())
            } else {
                None
            }
        };

        if let Some(timeline_id) = finished {
            self.observer
                .on_event(&PlaybackEvent::Finished { timeline_id });
        }
    }
}

/// Plays a [`RenderTimeline`] against a device API
pub struct TimelineExecutor {
    shared: Arc<Shared>,
}

impl TimelineExecutor {
    /// Executor on the wall clock with a background tick thread
    pub fn new(api: Arc<dyn DeviceApi>, config: ExecutorConfig) -> Self {
        let dispatcher = Dispatcher::new(api, config.dispatch_workers);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::idle()),
                control: Mutex::new(()),
                ticking: AtomicBool::new(false),
                clock: Arc::new(SystemClock::new()),
                ticker: Arc::new(ThreadTicker::new()),
                observer: Arc::new(LogObserver),
                dispatcher,
                config,
            }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.configure(|shared| shared.clock = clock);
        self
    }

    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.configure(|shared| shared.ticker = ticker);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PlaybackObserver>) -> Self {
        self.configure(|shared| shared.observer = observer);
        self
    }

    fn configure(&mut self, f: impl FnOnce(&mut Shared)) {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => f(shared),
            None => log::warn!("Executor already started; configuration change ignored"),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    fn tick_fn(&self) -> TickFn {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.tick();
            }
        })
    }

    fn start_ticker(&self) {
        self.shared
            .ticker
            .start(self.shared.config.tick_interval(), self.tick_fn());
    }

    /// Start playing `timeline` from `start` seconds
    pub fn play(&self, timeline: Arc<RenderTimeline>, start: f64) -> Result<()> {
        let _control = self.shared.control();

        if self.shared.core().state == PlaybackState::Playing {
            return Err(ShowError::state("a timeline is already playing"));
        }
        if !start.is_finite() || start < 0.0 || start > timeline.duration {
            return Err(ShowError::input(format!(
                "start position {} outside 0..={}",
                start, timeline.duration
            )));
        }

        self.shared.ticker.stop();
        self.shared.dispatcher.reset();

        let config = &self.shared.config;
        let mut window =
            LookaheadWindow::new(&timeline, start, config.lookahead_s, config.max_queue);
        window.refill(&timeline, start);
        log::debug!(
            "Window holds {} of {} commands at start",
            window.len(),
            window.total()
        );

        {
            let mut core = self.shared.core();
            core.state = PlaybackState::Playing;
            core.window = Some(window);
            core.timeline = Some(timeline.clone());
            core.anchor = self.shared.clock.now();
            core.anchor_position = start;
            core.position = start;
        }

        self.shared.observer.on_event(&PlaybackEvent::Started {
            timeline_id: timeline.id.clone(),
            position: start,
        });
        self.start_ticker();
        Ok(())
    }

    /// Advance playback to the clock position
    ///
    /// Called by the ticker; cooperative hosts using a manual ticker may call
    /// it directly. Does nothing unless playing.
    pub fn tick(&self) {
        self.shared.tick();
    }

    pub fn pause(&self) -> Result<()> {
        let _control = self.shared.control();
        let position = {
            let mut core = self.shared.core();
            if core.state != PlaybackState::Playing {
                return Err(ShowError::state(format!(
                    "cannot pause while {}",
                    core.state
                )));
            }
            let position = core.live_position(self.shared.clock.now());
            let duration = core.timeline.as_ref().map_or(position, |t| t.duration);
            core.position = position.min(duration);
            core.state = PlaybackState::Paused;
            core.position
        };

        self.shared.ticker.stop();
        self.shared
            .observer
            .on_event(&PlaybackEvent::Paused { position });
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let _control = self.shared.control();
        let position = {
            let mut core = self.shared.core();
            if core.state != PlaybackState::Paused {
                return Err(ShowError::state(format!(
                    "cannot resume while {}",
                    core.state
                )));
            }
            core.anchor = self.shared.clock.now();
            core.anchor_position = core.position;
            core.state = PlaybackState::Playing;
            core.position
        };

        self.shared
            .observer
            .on_event(&PlaybackEvent::Resumed { position });
        self.start_ticker();
        Ok(())
    }

    /// Jump to `position`, keeping the playing/paused state
    pub fn seek(&self, position: f64) -> Result<()> {
        let _control = self.shared.control();
        let was_playing = {
            let mut core = self.shared.core();
            let Some(timeline) = core.timeline.clone() else {
                return Err(ShowError::state("no timeline loaded"));
            };
            if core.state == PlaybackState::Stopped || core.state == PlaybackState::Idle {
                return Err(ShowError::state(format!(
                    "cannot seek while {}",
                    core.state
                )));
            }
            if !position.is_finite() || position < 0.0 || position > timeline.duration {
                return Err(ShowError::input(format!(
                    "seek position {} outside 0..={}",
                    position, timeline.duration
                )));
            }

            let was_playing = core.state == PlaybackState::Playing;
            // ticks are no-ops until the window is rebuilt
            core.state = PlaybackState::Paused;
            was_playing
        };
        if was_playing {
            self.shared.ticker.stop();
        }
        // calls queued for the old position never reach the lights
        self.shared.dispatcher.discard_in_flight();

        {
            let mut core = self.shared.core();
            let Some(timeline) = core.timeline.clone() else {
                return Err(ShowError::state("no timeline loaded"));
            };
            let config = &self.shared.config;
            let mut window =
                LookaheadWindow::new(&timeline, position, config.lookahead_s, config.max_queue);
            window.refill(&timeline, position);
            core.window = Some(window);
            core.position = position;
            core.anchor_position = position;
            core.anchor = self.shared.clock.now();
            if was_playing {
                core.state = PlaybackState::Playing;
            }
        }

        self.shared
            .observer
            .on_event(&PlaybackEvent::Seeked { position });
        if was_playing {
            self.start_ticker();
        }
        Ok(())
    }

    /// Halt playback and drop the queue; always safe
    pub fn stop(&self) {
        let _control = self.shared.control();
        let position = {
            let mut core = self.shared.core();
            if core.state == PlaybackState::Playing {
                let position = core.live_position(self.shared.clock.now());
                let duration = core.timeline.as_ref().map_or(position, |t| t.duration);
                core.position = position.min(duration);
            }
            if let Some(window) = core.window.as_mut() {
                window.clear();
            }
            let was_active = matches!(core.state, PlaybackState::Playing | PlaybackState::Paused);
            core.state = PlaybackState::Stopped;
            was_active.then_some(core.position)
        };

        self.shared.ticker.stop();
        self.shared.dispatcher.discard_in_flight();
        if let Some(position) = position {
            self.shared
                .observer
                .on_event(&PlaybackEvent::Stopped { position });
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.core().state
    }

    /// Materialized commands; never more than `max_queue`
    pub fn pending_commands_count(&self) -> usize {
        self.shared
            .core()
            .window
            .as_ref()
            .map_or(0, |w| w.len())
    }

    pub fn status(&self) -> ExecutionState {
        let core = self.shared.core();
        let dispatch = self.shared.dispatcher.stats();
        let (total_queued, pending, remaining) = core
            .window
            .as_ref()
            .map_or((0, 0, 0), |w| (w.total(), w.len(), w.remaining()));

        let position = match core.state {
            PlaybackState::Playing => {
                let live = core.live_position(self.shared.clock.now());
                core.timeline
                    .as_ref()
                    .map_or(live, |t| live.min(t.duration))
            }
            _ => core.position,
        };

        ExecutionState {
            state: core.state,
            position,
            timeline_id: core.timeline.as_ref().map(|t| t.id.clone()),
            stats: QueueStats {
                total_queued,
                pending,
                remaining,
                executing: dispatch.executing,
                completed: dispatch.completed,
                failed: dispatch.failed,
                average_latency_ms: dispatch.average_latency_ms,
            },
        }
    }

    /// Block until dispatched commands have finished or `timeout` passes
    pub fn wait_for_dispatch(&self, timeout: Duration) -> bool {
        self.shared.dispatcher.wait_idle(timeout)
    }
}

impl Drop for TimelineExecutor {
    fn drop(&mut self) {
        self.shared.ticker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AudioFeatures, Mood};
    use crate::config::RenderSettings;
    use crate::device::SimulatedDeviceApi;
    use crate::error::DeviceError;
    use crate::model::{
        DeviceTrack, EntityState, LightAttributes, RenderMetadata, ServiceCall, TimedCommand,
    };
    use crate::playback::clock::ManualClock;
    use crate::playback::observer::RecordingObserver;
    use crate::playback::ticker::ManualTicker;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    struct Rig {
        executor: TimelineExecutor,
        api: Arc<SimulatedDeviceApi>,
        clock: Arc<ManualClock>,
        ticker: Arc<ManualTicker>,
        observer: Arc<RecordingObserver>,
    }

    fn rig(devices: usize, config: ExecutorConfig) -> Rig {
        let states = (0..devices)
            .map(|i| EntityState {
                entity_id: format!("light.l{}", i),
                state: "off".to_string(),
                attributes: LightAttributes::default(),
            })
            .collect();
        let api = Arc::new(SimulatedDeviceApi::new(states));
        let clock = Arc::new(ManualClock::new());
        let ticker = Arc::new(ManualTicker::new());
        let observer = Arc::new(RecordingObserver::new());
        let executor = TimelineExecutor::new(api.clone(), config)
            .with_clock(clock.clone())
            .with_ticker(ticker.clone())
            .with_observer(observer.clone());
        Rig {
            executor,
            api,
            clock,
            ticker,
            observer,
        }
    }

    /// `per_track` evenly spaced brightness commands on each track
    fn timeline(devices: usize, per_track: usize, duration: f64) -> Arc<RenderTimeline> {
        let tracks = (0..devices)
            .map(|d| {
                let id = format!("light.l{}", d);
                let mut track = DeviceTrack::new(id.clone(), id);
                track.commands = (0..per_track)
                    .map(|i| {
                        let mut cmd = TimedCommand::turn_on(i as f64 * duration / per_track as f64);
                        cmd.params.brightness = Some((i % 255) as u8);
                        cmd
                    })
                    .collect();
                track
            })
            .collect();

        Arc::new(RenderTimeline {
            id: "tl-test".into(),
            name: "test".into(),
            audio_ref: "test.wav".into(),
            features: AudioFeatures {
                tempo: 120.0,
                beats: Vec::new(),
                slices: Vec::new(),
                energy: 0.5,
                mood: Mood::Energetic,
                duration,
            },
            duration,
            tracks,
            metadata: RenderMetadata {
                settings: RenderSettings::default(),
                device_count: devices,
                command_count: devices * per_track,
                processing_time_ms: 0.0,
                generated_at: Utc::now(),
                compensation: BTreeMap::new(),
                optimized_removed: 0,
            },
        })
    }

    #[test]
    fn test_long_show_respects_queue_cap() {
        let rig = rig(10, ExecutorConfig::default());
        let tl = timeline(10, 6_000, 600.0);
        rig.executor.play(tl, 0.0).unwrap();
        assert_eq!(rig.executor.status().stats.total_queued, 60_000);

        let mut max_seen = rig.executor.pending_commands_count();
        while rig.executor.state() == PlaybackState::Playing {
            rig.clock.advance_secs(0.25);
            assert!(rig.ticker.fire());
            max_seen = max_seen.max(rig.executor.pending_commands_count());
            assert!(rig.executor.pending_commands_count() <= 5_000);
        }
        assert!(max_seen > 0);

        assert!(rig.executor.wait_for_dispatch(Duration::from_secs(30)));
        let status = rig.executor.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.stats.completed, 60_000);
        assert_eq!(status.stats.failed, 0);
        assert_eq!(rig.api.call_count(), 60_000);
    }

    #[test]
    fn test_cap_binds_with_long_lookahead() {
        let config = ExecutorConfig {
            lookahead_s: 10_000.0,
            max_queue: 500,
            ..Default::default()
        };
        let rig = rig(4, config);
        rig.executor.play(timeline(4, 2_000, 100.0), 0.0).unwrap();
        assert_eq!(rig.executor.pending_commands_count(), 500);

        while rig.executor.state() == PlaybackState::Playing {
            rig.clock.advance_secs(1.0);
            rig.executor.tick();
            assert!(rig.executor.pending_commands_count() <= 500);
        }
        assert!(rig.executor.wait_for_dispatch(Duration::from_secs(30)));
        assert_eq!(rig.executor.status().stats.completed, 8_000);
    }

    #[test]
    fn test_per_device_order_preserved() {
        let rig = rig(3, ExecutorConfig::default());
        rig.executor.play(timeline(3, 200, 20.0), 0.0).unwrap();
        while rig.executor.state() == PlaybackState::Playing {
            rig.clock.advance_secs(0.5);
            rig.executor.tick();
        }
        assert!(rig.executor.wait_for_dispatch(Duration::from_secs(10)));

        for d in 0..3 {
            let id = format!("light.l{}", d);
            let levels: Vec<u64> = rig
                .api
                .calls()
                .iter()
                .filter(|c| c.entity_id() == Some(id.as_str()))
                .filter_map(|c| c.data.get("brightness").and_then(|b| b.as_u64()))
                .collect();
            assert_eq!(levels, (0..200u64).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_nothing_dispatched_before_its_time() {
        let rig = rig(1, ExecutorConfig::default());
        rig.executor.play(timeline(1, 10, 10.0), 0.0).unwrap();
        rig.executor.tick();
        assert!(rig.executor.wait_for_dispatch(Duration::from_secs(5)));
        // only the command at 0.0
        assert_eq!(rig.api.call_count(), 1);

        rig.clock.advance_secs(3.5);
        rig.executor.tick();
        assert!(rig.executor.wait_for_dispatch(Duration::from_secs(5)));
        assert_eq!(rig.api.call_count(), 4);
    }

    #[test]
    fn test_state_transitions() {
        let rig = rig(1, ExecutorConfig::default());
        let tl = timeline(1, 10, 10.0);

        assert_eq!(rig.executor.state(), PlaybackState::Idle);
        assert!(matches!(rig.executor.pause(), Err(ShowError::State(_))));
        assert!(matches!(rig.executor.resume(), Err(ShowError::State(_))));
        assert!(matches!(rig.executor.seek(1.0), Err(ShowError::State(_))));

        rig.executor.play(tl.clone(), 0.0).unwrap();
        assert!(matches!(
            rig.executor.play(tl.clone(), 0.0),
            Err(ShowError::State(_))
        ));
        assert!(matches!(rig.executor.resume(), Err(ShowError::State(_))));

        rig.clock.advance_secs(2.0);
        rig.executor.pause().unwrap();
        assert!(!rig.ticker.is_running());
        assert!((rig.executor.status().position - 2.0).abs() < 1e-9);

        // time passing while paused does not move the position
        rig.clock.advance_secs(5.0);
        assert!((rig.executor.status().position - 2.0).abs() < 1e-9);

        rig.executor.resume().unwrap();
        assert!(rig.ticker.is_running());
        rig.clock.advance_secs(1.0);
        assert!((rig.executor.status().position - 3.0).abs() < 1e-9);

        rig.executor.stop();
        assert_eq!(rig.executor.state(), PlaybackState::Stopped);
        assert_eq!(rig.executor.pending_commands_count(), 0);
        assert!(!rig.ticker.is_running());
        rig.executor.stop();

        rig.executor.play(tl, 0.0).unwrap();
        assert_eq!(rig.executor.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_invalid_start_rejected() {
        let rig = rig(1, ExecutorConfig::default());
        let tl = timeline(1, 10, 10.0);
        assert!(matches!(
            rig.executor.play(tl.clone(), -1.0),
            Err(ShowError::Input(_))
        ));
        assert!(matches!(
            rig.executor.play(tl, 11.0),
            Err(ShowError::Input(_))
        ));
        assert_eq!(rig.executor.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_play_from_offset() {
        let rig = rig(2, ExecutorConfig::default());
        rig.executor.play(timeline(2, 100, 10.0), 5.0).unwrap();
        assert_eq!(rig.executor.status().stats.total_queued, 100);
        rig.executor.tick();
        assert!(rig.executor.wait_for_dispatch(Duration::from_secs(5)));
        // the command at exactly 5.0 on each track
        assert_eq!(rig.api.call_count(), 2);
    }

    #[test]
    fn test_seek_rebuilds_window() {
        let rig = rig(1, ExecutorConfig::default());
        rig.executor.play(timeline(1, 100, 100.0), 0.0).unwrap();
        rig.executor.tick();

        rig.executor.seek(50.0).unwrap();
        assert_eq!(rig.executor.state(), PlaybackState::Playing);
        let status = rig.executor.status();
        assert_eq!(status.stats.total_queued, 50);
        assert!((status.position - 50.0).abs() < 1e-9);

        rig.executor.pause().unwrap();
        rig.executor.seek(10.0).unwrap();
        assert_eq!(rig.executor.state(), PlaybackState::Paused);
        assert_eq!(rig.executor.status().stats.total_queued, 90);

        assert!(matches!(
            rig.executor.seek(1000.0),
            Err(ShowError::Input(_))
        ));
    }

    /// Takes 50ms per call and counts the calls that reach it
    struct SlowApi {
        calls: AtomicUsize,
    }

    impl DeviceApi for SlowApi {
        fn get_state(&self, _entity_id: &str) -> std::result::Result<Option<EntityState>, DeviceError> {
            Ok(None)
        }

        fn call_service(&self, _call: &ServiceCall) -> std::result::Result<(), DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }

        fn list_states(&self) -> std::result::Result<Vec<EntityState>, DeviceError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_seek_drops_calls_for_old_position() {
        let api = Arc::new(SlowApi {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new());
        let executor = TimelineExecutor::new(api.clone(), ExecutorConfig::default())
            .with_clock(clock.clone())
            .with_ticker(Arc::new(ManualTicker::new()));

        // commands every 50ms; the first second puts 21 on one worker
        executor.play(timeline(1, 100, 5.0), 0.0).unwrap();
        clock.advance_secs(1.0);
        executor.tick();

        executor.seek(4.0).unwrap();
        assert!(executor.wait_for_dispatch(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(200));

        let calls = api.calls.load(Ordering::SeqCst);
        assert!(calls < 21, "{} calls reached the light", calls);
        let status = executor.status();
        assert_eq!(status.stats.executing, 0);
        assert!(status.stats.completed < 21);
        assert_eq!(status.stats.total_queued, 20);
    }

    #[test]
    fn test_auto_stop_emits_events() {
        let rig = rig(1, ExecutorConfig::default());
        rig.executor.play(timeline(1, 4, 2.0), 0.0).unwrap();
        rig.clock.advance_secs(2.5);
        rig.executor.tick();

        assert_eq!(rig.executor.state(), PlaybackState::Stopped);
        assert!(!rig.ticker.is_running());
        assert!((rig.executor.status().position - 2.0).abs() < 1e-9);

        let events = rig.observer.events();
        assert!(matches!(events.first(), Some(PlaybackEvent::Started { .. })));
        assert!(matches!(events.last(), Some(PlaybackEvent::Finished { .. })));
    }

    #[test]
    fn test_failed_commands_are_counted() {
        let states = vec![EntityState {
            entity_id: "light.l0".to_string(),
            state: "off".to_string(),
            attributes: LightAttributes::default(),
        }];
        let api = Arc::new(SimulatedDeviceApi::new(states).with_failing("light.l0"));
        let clock = Arc::new(ManualClock::new());
        let observer = Arc::new(RecordingObserver::new());
        let executor = TimelineExecutor::new(api, ExecutorConfig::default())
            .with_clock(clock.clone())
            .with_ticker(Arc::new(ManualTicker::new()))
            .with_observer(observer.clone());

        executor.play(timeline(1, 5, 5.0), 0.0).unwrap();
        clock.advance_secs(6.0);
        executor.tick();
        assert!(executor.wait_for_dispatch(Duration::from_secs(5)));

        let stats = executor.status().stats;
        assert_eq!(stats.failed, 5);
        assert_eq!(stats.completed, 0);
        let failures = observer
            .events()
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::CommandFailed { .. }))
            .count();
        assert_eq!(failures, 5);
    }

    #[test]
    fn test_thread_ticker_plays_to_the_end() {
        let api = Arc::new(SimulatedDeviceApi::new(vec![EntityState {
            entity_id: "light.l0".to_string(),
            state: "off".to_string(),
            attributes: LightAttributes::default(),
        }]));
        let executor = TimelineExecutor::new(api.clone(), ExecutorConfig::default());
        executor.play(timeline(1, 10, 0.2), 0.0).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while executor.state() == PlaybackState::Playing && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(executor.state(), PlaybackState::Stopped);
        assert!(executor.wait_for_dispatch(Duration::from_secs(5)));
        assert_eq!(api.call_count(), 10);
    }
}
