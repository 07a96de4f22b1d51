use light_sync::analysis::{decode_file, SpectralAnalyzer};
use light_sync::config::{AnalysisSettings, ShowConfig};
use light_sync::device::SimulatedDeviceApi;
use light_sync::model::{ColorMode, EntityState, LightAttributes};
use light_sync::playback::{ManualClock, ManualTicker, PlaybackState, TimelineExecutor};
use light_sync::store::DirStore;
use light_sync::{PlaybackAction, RenderRequest, ShowSession};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Mono 16-bit kick track: a decaying 60 Hz burst on every beat
fn write_kick_track(path: &Path, seconds: u32, sample_rate: u32, bpm: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let beat_samples = (sample_rate as f64 * 60.0 / bpm) as usize;
    let total = (sample_rate * seconds) as usize;

    for n in 0..total {
        let since_beat = (n % beat_samples) as f64 / sample_rate as f64;
        let envelope = (-since_beat * 30.0).exp();
        let t = n as f64 / sample_rate as f64;
        let sample = (2.0 * std::f64::consts::PI * 60.0 * t).sin() * envelope * 0.9;
        writer
            .write_sample((sample * i16::MAX as f64) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

fn rgb_light(id: &str, manufacturer: &str) -> EntityState {
    EntityState {
        entity_id: id.to_string(),
        state: "off".to_string(),
        attributes: LightAttributes {
            friendly_name: Some(id.trim_start_matches("light.").to_string()),
            manufacturer: Some(manufacturer.to_string()),
            brightness: Some(0),
            supported_color_modes: vec![ColorMode::Rgb],
            ..Default::default()
        },
    }
}

#[test]
fn test_sixty_second_kick_track() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("kick.wav");
    write_kick_track(&wav, 60, 44_100, 120.0);

    let buffer = decode_file(&wav).unwrap();
    assert_eq!(buffer.sample_rate(), 44_100);

    let analyzer = SpectralAnalyzer::new(AnalysisSettings {
        fft_size: 2048,
        hop_size: 512,
        ..Default::default()
    })
    .unwrap();
    let features = analyzer.analyze(&buffer).unwrap();

    assert!((features.duration - 60.0).abs() < 0.01);
    assert!(!features.beats.is_empty());
    assert!(
        features.tempo >= 100.0 && features.tempo <= 140.0,
        "tempo {}",
        features.tempo
    );
    assert_eq!(features.slices.len(), (buffer.len() - 2048) / 512 + 1);

    for pair in features.beats.windows(2) {
        assert!(pair[1] - pair[0] >= 0.3);
    }
}

#[test]
fn test_profile_render_and_play() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("show.wav");
    write_kick_track(&wav, 4, 22_050, 120.0);

    let api = Arc::new(
        SimulatedDeviceApi::new(vec![
            rgb_light("light.fast", "Acme"),
            rgb_light("light.slow", "Acme"),
        ])
        .with_latency("light.fast", Duration::from_millis(50))
        .with_latency("light.slow", Duration::from_millis(300)),
    );

    let mut config = ShowConfig::default();
    config.profiler.settle_ms = 5;
    config.profiler.poll_interval_ms = 2;
    config.profiler.timeout_ms = 1000;
    config.profiler.transition_targets = Vec::new();

    let clock = Arc::new(ManualClock::new());
    let executor = TimelineExecutor::new(api.clone(), config.executor.clone())
        .with_clock(clock.clone())
        .with_ticker(Arc::new(ManualTicker::new()));
    let store = Arc::new(DirStore::open(dir.path().join("store")).unwrap());
    let mut session = ShowSession::new(api.clone(), store.clone(), config.clone())
        .unwrap()
        .with_executor(executor);

    let fast = session.profile_device("light.fast", Some(2)).unwrap();
    let slow = session.profile_device("light.slow", Some(2)).unwrap();
    assert!(fast.latency_ms >= 50.0 && fast.latency_ms < 80.0);
    assert!(slow.latency_ms >= 300.0 && slow.latency_ms < 330.0);

    let timeline = session.render_timeline(&RenderRequest::new(&wav)).unwrap();
    let compensation = &timeline.metadata.compensation;
    assert_eq!(compensation.get("light.fast"), Some(&0.0));
    let slow_shift = compensation.get("light.slow").copied().unwrap_or_default();
    assert!((slow_shift - 250.0).abs() < 30.0, "slow shift {}", slow_shift);

    for track in &timeline.tracks {
        assert!(track.commands.iter().all(|c| c.timestamp >= 0.0));
        assert!(track.is_ordered());
    }

    session.play_timeline(&timeline.id, None).unwrap();
    while session.playback_status().state == PlaybackState::Playing {
        clock.advance_secs(0.1);
        session.executor().tick();
        assert!(session.playback_status().stats.pending <= config.executor.max_queue);
    }
    assert!(session.executor().wait_for_dispatch(Duration::from_secs(10)));

    let status = session.playback_status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert_eq!(status.stats.completed, timeline.command_count());
    assert_eq!(status.stats.failed, 0);
    assert!(matches!(
        session.control_playback(PlaybackAction::Pause),
        Err(light_sync::ShowError::State(_))
    ));

    // a fresh session on the same store sees the timeline and the profiles
    drop(session);
    let reopened = ShowSession::new(api, store, config).unwrap();
    assert_eq!(reopened.list_timelines().unwrap().len(), 1);
    assert_eq!(reopened.profiles().len(), 2);
    assert!(reopened.export_timeline(&timeline.id).is_ok());
}
