use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use light_sync::config::{ColorMapping, LatencyEstimates};
use light_sync::device::{DeviceApi, SimulatedDeviceApi};
use light_sync::model::Capability;
use light_sync::playback::PlaybackState;
use light_sync::store::DirStore;
use light_sync::{RenderRequest, ShowConfig, ShowSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "light-sync")]
#[command(about = "Render and play audio-synchronized light shows", long_about = None)]
struct Args {
    /// Directory holding timelines, device profiles and the analysis cache
    #[arg(short = 's', long, default_value = "~/.local/share/light-sync")]
    store: String,

    /// Verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze an audio file and print its features
    Analyze {
        audio: String,

        #[arg(long)]
        fft_size: Option<usize>,

        #[arg(long)]
        hop_size: Option<usize>,

        /// Resample to this rate before analysis
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Print the full features as JSON
        #[arg(long)]
        json: bool,
    },

    /// List lights from a device state file
    Scan {
        /// JSON array of entity states
        #[arg(short = 'd', long)]
        devices: String,

        #[arg(long)]
        area: Option<String>,

        /// brightness, color, color_temp or effects
        #[arg(long)]
        capability: Option<Capability>,
    },

    /// Render a timeline for an audio file
    Render {
        audio: String,

        #[arg(short = 'd', long)]
        devices: String,

        /// Render only these lights (can be specified multiple times)
        #[arg(long = "light")]
        lights: Vec<String>,

        #[arg(long)]
        intensity: Option<f64>,

        /// frequency or mood
        #[arg(long)]
        mapping: Option<ColorMapping>,

        #[arg(long)]
        no_beat_sync: bool,

        #[arg(long)]
        no_smooth: bool,

        /// Remove redundant commands after rendering
        #[arg(long)]
        optimize: bool,

        /// Where to write the timeline document
        #[arg(short = 'o', long)]
        output: PathBuf,
    },

    /// Measure the latency and limits of one light
    Profile {
        #[arg(short = 'd', long)]
        devices: String,

        device_id: String,

        #[arg(long)]
        iterations: Option<u32>,
    },

    /// Play a timeline document against the simulated lights
    Play {
        timeline: String,

        #[arg(short = 'd', long)]
        devices: String,

        /// Start position in seconds
        #[arg(long, default_value = "0")]
        start: f64,
    },
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Simulated lights whose latency follows their manufacturer
fn open_devices(path: &str, estimates: &LatencyEstimates) -> Result<Arc<SimulatedDeviceApi>> {
    let api = SimulatedDeviceApi::load(&expand(path))?;
    for state in api.list_states()? {
        let attrs = &state.attributes;
        let ms = estimates.estimate(attrs.manufacturer.as_deref(), attrs.model.as_deref());
        api.set_latency(&state.entity_id, Duration::from_secs_f64(ms / 1000.0));
        log::debug!("{}: simulated latency {:.0}ms", state.entity_id, ms);
    }
    Ok(Arc::new(api))
}

fn open_session(store: &str, api: Arc<dyn DeviceApi>, config: ShowConfig) -> Result<ShowSession> {
    let store = DirStore::open(expand(store))?;
    Ok(ShowSession::new(api, Arc::new(store), config)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = ShowConfig::new();

    match args.command {
        Command::Analyze {
            audio,
            fft_size,
            hop_size,
            sample_rate,
            json,
        } => {
            if let Some(hop) = hop_size {
                config.analysis.hop_size = hop;
            }
            let api = Arc::new(SimulatedDeviceApi::new(Vec::new()));
            let session = open_session(&args.store, api, config)?;
            let features = session.analyze_audio(&expand(&audio), sample_rate, fft_size)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&features)?);
            } else {
                println!("Duration: {:.2}s", features.duration);
                println!("Tempo:    {:.1} BPM", features.tempo);
                println!("Beats:    {}", features.beats.len());
                println!("Energy:   {:.3}", features.energy);
                println!("Mood:     {}", features.mood.name());
                println!("Slices:   {}", features.slices.len());
            }
        }

        Command::Scan {
            devices,
            area,
            capability,
        } => {
            let api = open_devices(&devices, &config.latency)?;
            let session = open_session(&args.store, api, config)?;
            for device in session.scan_devices(area.as_deref(), capability)? {
                let unprofiled = session.profiles().get(&device.id).is_none();
                println!(
                    "{}{}",
                    device,
                    if unprofiled { "  (not profiled)" } else { "" }
                );
            }
        }

        Command::Render {
            audio,
            devices,
            lights,
            intensity,
            mapping,
            no_beat_sync,
            no_smooth,
            optimize,
            output,
        } => {
            config.render.optimize = optimize;
            let api = open_devices(&devices, &config.latency)?;
            let session = open_session(&args.store, api, config)?;

            let request = RenderRequest {
                audio_file: expand(&audio),
                device_ids: (!lights.is_empty()).then_some(lights),
                intensity,
                color_mapping: mapping,
                beat_sync: Some(!no_beat_sync),
                smooth_transitions: Some(!no_smooth),
            };
            let timeline = session.render_timeline(&request)?;
            let document = session.export_timeline(&timeline.id)?;
            std::fs::write(&output, document)
                .with_context(|| format!("Failed to write timeline to {:?}", output))?;

            log::info!(
                "Timeline {} written to {:?}: {} lights, {} commands, {} removed as redundant",
                timeline.id,
                output,
                timeline.tracks.len(),
                timeline.command_count(),
                timeline.metadata.optimized_removed
            );
        }

        Command::Profile {
            devices,
            device_id,
            iterations,
        } => {
            let api = open_devices(&devices, &config.latency)?;
            let mut session = open_session(&args.store, api, config)?;
            let profile = session.profile_device(&device_id, iterations)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);

            let stale = session.stale_profiles();
            if !stale.is_empty() {
                log::warn!("Profiles due for re-measurement: {}", stale.join(", "));
            }
        }

        Command::Play {
            timeline,
            devices,
            start,
        } => {
            let path = expand(&timeline);
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read timeline {:?}", path))?;

            let api = open_devices(&devices, &config.latency)?;
            let session = open_session(&args.store, api, config)?;
            let timeline = session.import_timeline(&json)?;
            session.play_timeline(&timeline.id, Some(start))?;

            loop {
                thread::sleep(Duration::from_secs(1));
                let status = session.playback_status();
                log::info!(
                    "{:>7.2}s / {:.2}s  pending {}  completed {}  failed {}",
                    status.position,
                    timeline.duration,
                    status.stats.pending,
                    status.stats.completed,
                    status.stats.failed
                );
                if status.state != PlaybackState::Playing {
                    break;
                }
            }

            session.executor().wait_for_dispatch(Duration::from_secs(5));
            let status = session.playback_status();
            log::info!(
                "Done: {} completed, {} failed, average latency {:.1}ms",
                status.stats.completed,
                status.stats.failed,
                status.stats.average_latency_ms
            );
        }
    }

    Ok(())
}
