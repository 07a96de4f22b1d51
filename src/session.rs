//! One show session: analysis, devices, profiles, rendering and playback
//!
//! The session is the caller-owned context for a show. It holds the live
//! profile map and the executor, and persists timelines, devices and cached
//! analysis through a [`ShowStore`].

use crate::analysis::{decode_file, resample_linear, AudioFeatures, SpectralAnalyzer};
use crate::config::{ColorMapping, ShowConfig};
use crate::device::{find_device, scan_devices, DeviceApi};
use crate::error::{Result, ShowError};
use crate::model::{Capability, DeviceProfile, LightDevice, ProfileBook, RenderTimeline};
use crate::playback::{ExecutionState, TimelineExecutor};
use crate::profiler::{CancelToken, DeviceProfiler};
use crate::store::{AnalysisCache, ShowStore, TimelineRecord, TimelineRepository};
use crate::sync::SyncCalculator;
use crate::timeline::{self, GenerateOptions, TimelineGenerator};
use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parameters of [`ShowSession::render_timeline`]; unset fields use the config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderRequest {
    pub audio_file: PathBuf,

    /// Lights to render for; all lights when unset
    pub device_ids: Option<Vec<String>>,
    pub intensity: Option<f64>,
    pub color_mapping: Option<ColorMapping>,
    pub beat_sync: Option<bool>,
    pub smooth_transitions: Option<bool>,
}

impl RenderRequest {
    pub fn new(audio_file: impl Into<PathBuf>) -> Self {
        Self {
            audio_file: audio_file.into(),
            ..Default::default()
        }
    }

    pub fn with_devices(mut self, ids: Vec<String>) -> Self {
        self.device_ids = Some(ids);
        self
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_color_mapping(mut self, mapping: ColorMapping) -> Self {
        self.color_mapping = Some(mapping);
        self
    }
}

/// Playback control verbs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "action", content = "position")]
pub enum PlaybackAction {
    Pause,
    Resume,
    Stop,
    Seek(f64),
}

pub struct ShowSession {
    config: ShowConfig,
    api: Arc<dyn DeviceApi>,
    repository: TimelineRepository,
    cache: AnalysisCache,
    profiles: ProfileBook,
    executor: TimelineExecutor,
}

impl ShowSession {
    /// Open a session, loading stored profiles
    pub fn new(api: Arc<dyn DeviceApi>, store: Arc<dyn ShowStore>, config: ShowConfig) -> Result<Self> {
        let repository = TimelineRepository::new(store.clone());
        let profiles = repository.load_profiles()?;
        log::debug!("Loaded {} stored profiles", profiles.len());

        let executor = TimelineExecutor::new(api.clone(), config.executor.clone());
        Ok(Self {
            config,
            api,
            repository,
            cache: AnalysisCache::new(store),
            profiles,
            executor,
        })
    }

    /// Replace the executor, e.g. one driven by a manual clock
    pub fn with_executor(mut self, executor: TimelineExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &ShowConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileBook {
        &self.profiles
    }

    pub fn executor(&self) -> &TimelineExecutor {
        &self.executor
    }

    /// Decode and analyze an audio file, using the cache when possible
    pub fn analyze_audio(
        &self,
        file: &Path,
        sample_rate: Option<u32>,
        fft_size: Option<usize>,
    ) -> Result<AudioFeatures> {
        let mut settings = self.config.analysis.clone();
        if let Some(fft) = fft_size {
            settings.fft_size = fft;
        }
        if sample_rate == Some(0) {
            return Err(ShowError::input("sample rate must be positive"));
        }
        let analyzer = SpectralAnalyzer::new(settings.clone())?;

        if !file.is_file() {
            return Err(ShowError::Resource(anyhow!(
                "audio file not found: {:?}",
                file
            )));
        }

        let key = match AnalysisCache::key_for(file, &settings, sample_rate) {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("Analysis cache unavailable: {:#}", e);
                None
            }
        };
        if let Some(key) = &key {
            match self.cache.get(key) {
                Ok(Some(features)) => return Ok(features),
                Ok(None) => {}
                Err(e) => log::warn!("Analysis cache read failed: {:#}", e),
            }
        }

        log::info!("Analyzing {:?}", file);
        let mut buffer =
            decode_file(file).map_err(|e| ShowError::input(format!("{:#}", e)))?;
        if let Some(rate) = sample_rate {
            if rate != buffer.sample_rate() {
                buffer = resample_linear(&buffer, rate)?;
            }
        }
        let features = analyzer.analyze(&buffer)?;
        log::info!(
            "{:.1}s, {:.0} BPM, {} beats, mood {}",
            features.duration,
            features.tempo,
            features.beats.len(),
            features.mood.name()
        );

        if let Some(key) = &key {
            if let Err(e) = self.cache.put(key, &file.to_string_lossy(), &features) {
                log::warn!("Analysis cache write failed: {:#}", e);
            }
        }
        Ok(features)
    }

    /// Discover lights and record them in the store
    pub fn scan_devices(
        &self,
        area: Option<&str>,
        capability: Option<Capability>,
    ) -> Result<Vec<LightDevice>> {
        let devices = scan_devices(self.api.as_ref(), area, capability)?;
        for device in &devices {
            if let Err(e) = self.repository.save_device(device) {
                log::warn!("Failed to store device {}: {:#}", device.id, e);
            }
        }
        Ok(devices)
    }

    /// Profile one light and merge the result into the session's profiles
    pub fn profile_device(&mut self, id: &str, iterations: Option<u32>) -> Result<DeviceProfile> {
        self.profile_device_with_cancel(id, iterations, &CancelToken::new())
    }

    pub fn profile_device_with_cancel(
        &mut self,
        id: &str,
        iterations: Option<u32>,
        token: &CancelToken,
    ) -> Result<DeviceProfile> {
        let device = find_device(self.api.as_ref(), id)?;
        let iterations = iterations.unwrap_or(self.config.profiler.default_iterations);

        let profiler = DeviceProfiler::new(self.api.clone(), self.config.profiler.clone());
        let profile = profiler.profile_with_cancel(&device, iterations, token)?;

        let merged = self.profiles.upsert(profile).clone();
        self.repository.save_device(&device)?;
        self.repository.save_profile(&merged)?;
        Ok(merged)
    }

    /// Device ids whose profiles are due for re-measurement
    pub fn stale_profiles(&self) -> Vec<String> {
        self.profiles
            .stale_ids(Utc::now(), self.config.reprofile_interval_days)
    }

    /// Analyze, render and store a timeline
    pub fn render_timeline(&self, request: &RenderRequest) -> Result<RenderTimeline> {
        let features = self.analyze_audio(&request.audio_file, None, None)?;

        let devices = match &request.device_ids {
            Some(ids) => ids
                .iter()
                .map(|id| find_device(self.api.as_ref(), id))
                .collect::<Result<Vec<_>>>()?,
            None => self.scan_devices(None, None)?,
        };

        let mut settings = self.config.render.clone();
        if let Some(intensity) = request.intensity {
            settings.intensity = intensity;
        }
        if let Some(mapping) = request.color_mapping {
            settings.color_mapping = mapping;
        }
        if let Some(beat_sync) = request.beat_sync {
            settings.beat_sync = beat_sync;
        }
        if let Some(smooth) = request.smooth_transitions {
            settings.smooth_transitions = smooth;
        }

        let generator = TimelineGenerator::new(settings)
            .with_sync(SyncCalculator::new(self.config.latency.clone()))
            .with_similarity(self.config.similarity.clone());
        let options = GenerateOptions::new(request.audio_file.to_string_lossy());
        let timeline = generator.generate(&features, &devices, &self.profiles, &options)?;

        self.repository.save_timeline(&timeline)?;
        log::info!(
            "Stored timeline {} ({} commands)",
            timeline.id,
            timeline.command_count()
        );
        Ok(timeline)
    }

    pub fn list_timelines(&self) -> Result<Vec<TimelineRecord>> {
        Ok(self.repository.list_timelines()?)
    }

    fn load_timeline(&self, id: &str) -> Result<RenderTimeline> {
        self.repository
            .load_timeline(id)?
            .ok_or_else(|| ShowError::UnknownTimeline(id.to_string()))
    }

    /// Start playing a stored timeline
    pub fn play_timeline(&self, id: &str, start_position: Option<f64>) -> Result<ExecutionState> {
        let timeline = self.load_timeline(id)?;
        self.executor
            .play(Arc::new(timeline), start_position.unwrap_or(0.0))?;
        Ok(self.executor.status())
    }

    pub fn control_playback(&self, action: PlaybackAction) -> Result<ExecutionState> {
        match action {
            PlaybackAction::Pause => self.executor.pause()?,
            PlaybackAction::Resume => self.executor.resume()?,
            PlaybackAction::Stop => self.executor.stop(),
            PlaybackAction::Seek(position) => self.executor.seek(position)?,
        }
        Ok(self.executor.status())
    }

    pub fn playback_status(&self) -> ExecutionState {
        self.executor.status()
    }

    /// Versioned JSON document of a stored timeline
    pub fn export_timeline(&self, id: &str) -> Result<String> {
        timeline::export_timeline(&self.load_timeline(id)?)
    }

    /// Validate a document and store the timeline it carries
    pub fn import_timeline(&self, json: &str) -> Result<RenderTimeline> {
        let timeline = timeline::import_timeline(json)?;
        self.repository.save_timeline(&timeline)?;
        Ok(timeline)
    }
}
