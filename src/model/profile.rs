use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// How a profile was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMethod {
    /// Measured by the profiler
    Auto,
    /// Entered by a person
    Manual,
    /// Derived from manufacturer tables
    Estimated,
}

impl CalibrationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationMethod::Auto => "auto",
            CalibrationMethod::Manual => "manual",
            CalibrationMethod::Estimated => "estimated",
        }
    }
}

/// Measured behaviour of one effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectPerformance {
    /// Time until the state reported the effect; unknown when it never did
    pub latency_ms: Option<f64>,
    pub success: bool,
    pub measured_at: DateTime<Utc>,
}

/// Measured behavioural characteristics of a device
///
/// Optional fields are unknown until a test measures them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_id: String,

    /// Mean command-to-state latency
    pub latency_ms: f64,

    /// Shortest transition the device honoured (seconds)
    pub min_transition_s: Option<f64>,

    /// Longest transition the device honoured (seconds)
    pub max_transition_s: Option<f64>,

    pub response_std_dev_ms: Option<f64>,
    pub p99_response_ms: Option<f64>,

    /// 0-1, from the color sweep
    pub color_accuracy: Option<f64>,

    /// R² of reported vs commanded brightness
    pub brightness_linearity: Option<f64>,

    #[serde(default)]
    pub effect_performance: BTreeMap<String, EffectPerformance>,

    pub last_calibrated: DateTime<Utc>,
    pub calibration_method: CalibrationMethod,

    #[serde(default)]
    pub successful_samples: u32,
    #[serde(default)]
    pub failed_samples: u32,
}

impl DeviceProfile {
    /// Profile with only a latency, calibrated now
    pub fn new(device_id: impl Into<String>, latency_ms: f64, method: CalibrationMethod) -> Self {
        Self {
            device_id: device_id.into(),
            latency_ms,
            min_transition_s: None,
            max_transition_s: None,
            response_std_dev_ms: None,
            p99_response_ms: None,
            color_accuracy: None,
            brightness_linearity: None,
            effect_performance: BTreeMap::new(),
            last_calibrated: Utc::now(),
            calibration_method: method,
            successful_samples: 0,
            failed_samples: 0,
        }
    }

    pub fn with_calibrated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_calibrated = at;
        self
    }

    /// Merge two profiles of the same device
    ///
    /// The newer profile wins field by field; unknown fields fall back to
    /// the older profile, and effect records merge key by key.
    pub fn merge(&self, other: &DeviceProfile) -> DeviceProfile {
        let (older, newer) = if other.last_calibrated >= self.last_calibrated {
            (self, other)
        } else {
            (other, self)
        };

        let mut effect_performance = older.effect_performance.clone();
        for (name, perf) in &newer.effect_performance {
            effect_performance.insert(name.clone(), perf.clone());
        }

        DeviceProfile {
            device_id: newer.device_id.clone(),
            latency_ms: newer.latency_ms,
            min_transition_s: newer.min_transition_s.or(older.min_transition_s),
            max_transition_s: newer.max_transition_s.or(older.max_transition_s),
            response_std_dev_ms: newer.response_std_dev_ms.or(older.response_std_dev_ms),
            p99_response_ms: newer.p99_response_ms.or(older.p99_response_ms),
            color_accuracy: newer.color_accuracy.or(older.color_accuracy),
            brightness_linearity: newer.brightness_linearity.or(older.brightness_linearity),
            effect_performance,
            last_calibrated: newer.last_calibrated,
            calibration_method: newer.calibration_method,
            successful_samples: newer.successful_samples,
            failed_samples: newer.failed_samples,
        }
    }

    /// Whether the profile should be re-measured
    pub fn is_stale(&self, now: DateTime<Utc>, reprofile_interval_days: i64) -> bool {
        now - self.last_calibrated >= Duration::days(reprofile_interval_days)
    }

    /// Clamp a requested transition to the proven range
    pub fn clamp_transition(&self, seconds: f64) -> f64 {
        let lo = self.min_transition_s.unwrap_or(0.0);
        let hi = self.max_transition_s.unwrap_or(f64::MAX);
        if seconds <= 0.0 {
            return 0.0;
        }
        seconds.clamp(lo, hi.max(lo))
    }
}

/// Caller-owned set of live profiles, one per device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileBook {
    profiles: HashMap<String, DeviceProfile>,
}

impl ProfileBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceProfile> {
        self.profiles.get(device_id)
    }

    /// Insert a profile, merging with any existing one for the device
    pub fn upsert(&mut self, profile: DeviceProfile) -> &DeviceProfile {
        let merged = match self.profiles.get(&profile.device_id) {
            Some(existing) => existing.merge(&profile),
            None => profile,
        };
        let id = merged.device_id.clone();
        self.profiles.insert(id.clone(), merged);
        &self.profiles[&id]
    }

    pub fn remove(&mut self, device_id: &str) -> Option<DeviceProfile> {
        self.profiles.remove(device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Ids of profiles due for re-measurement, sorted
    pub fn stale_ids(&self, now: DateTime<Utc>, reprofile_interval_days: i64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .profiles
            .values()
            .filter(|p| p.is_stale(now, reprofile_interval_days))
            .map(|p| p.device_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl FromIterator<DeviceProfile> for ProfileBook {
    fn from_iter<I: IntoIterator<Item = DeviceProfile>>(iter: I) -> Self {
        let mut book = ProfileBook::new();
        for profile in iter {
            book.upsert(profile);
        }
        book
    }
}
