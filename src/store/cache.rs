//! Cache of analysis results keyed by file contents and settings

use super::ShowStore;
use crate::analysis::AudioFeatures;
use crate::config::AnalysisSettings;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const PREFIX: &str = "analysis/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub source: String,
    pub features: AudioFeatures,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub hits: u64,
}

#[derive(Clone)]
pub struct AnalysisCache {
    store: Arc<dyn ShowStore>,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn ShowStore>) -> Self {
        Self { store }
    }

    /// md5 over the file bytes, the serialized settings and the target rate
    pub fn key_for(
        path: &Path,
        settings: &AnalysisSettings,
        sample_rate: Option<u32>,
    ) -> Result<String> {
        let mut data =
            fs::read(path).with_context(|| format!("Failed to read audio file {:?}", path))?;
        let settings = serde_json::to_vec(settings).context("Failed to encode analysis settings")?;
        data.extend_from_slice(&settings);
        data.extend_from_slice(&sample_rate.unwrap_or(0).to_le_bytes());
        Ok(format!("{:x}", md5::compute(&data)))
    }

    fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.store.get(&format!("{}{}", PREFIX, key))? {
            Some(value) => Ok(Some(
                serde_json::from_value(value)
                    .with_context(|| format!("Corrupt cache entry {}", key))?,
            )),
            None => Ok(None),
        }
    }

    fn write(&self, entry: &CacheEntry) -> Result<()> {
        let value = serde_json::to_value(entry).context("Failed to encode cache entry")?;
        self.store.set(&format!("{}{}", PREFIX, entry.key), &value)
    }

    /// Cached features, recording the access
    pub fn get(&self, key: &str) -> Result<Option<AudioFeatures>> {
        let Some(mut entry) = self.read(key)? else {
            return Ok(None);
        };
        entry.last_accessed = Utc::now();
        entry.hits += 1;
        self.write(&entry)?;
        log::debug!("Analysis cache hit for {} ({} hits)", entry.source, entry.hits);
        Ok(Some(entry.features))
    }

    pub fn put(&self, key: &str, source: &str, features: &AudioFeatures) -> Result<()> {
        let now = Utc::now();
        self.write(&CacheEntry {
            key: key.to_string(),
            source: source.to_string(),
            features: features.clone(),
            created_at: now,
            last_accessed: now,
            hits: 0,
        })
    }

    /// Entry metadata without counting an access
    pub fn entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.read(key)
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.store.list(PREFIX)? {
            let id = key.trim_start_matches(PREFIX);
            if let Some(entry) = self.read(id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Drop entries idle longer than `max_age`, then the least recently
    /// accessed until at most `max_entries` remain; returns how many went
    pub fn prune(&self, max_entries: usize, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries()?;
        entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

        let mut removed = 0;
        for (rank, entry) in entries.iter().enumerate() {
            let expired = now - entry.last_accessed > max_age;
            if expired || rank >= max_entries {
                self.store.remove(&format!("{}{}", PREFIX, entry.key))?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Pruned {} analysis cache entries", removed);
        }
        Ok(removed)
    }
}
