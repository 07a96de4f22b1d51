//! Persistence for timelines, devices and cached analysis
//!
//! Everything is stored as JSON values under slash-separated keys through the
//! [`ShowStore`] trait. [`MemoryStore`] keeps them in a map, [`DirStore`]
//! writes one file per key.

mod cache;
mod dir;
mod memory;
mod repository;

use anyhow::{bail, Result};
use serde_json::Value;

pub use cache::{AnalysisCache, CacheEntry};
pub use dir::DirStore;
pub use memory::MemoryStore;
pub use repository::{BeatRecord, DeviceRecord, SliceRecord, TimelineRecord, TimelineRepository};

/// Key/value storage for JSON documents
pub trait ShowStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Keys starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a key; returns whether it existed
    fn remove(&self, key: &str) -> Result<bool>;
}

/// Keys are `/`-separated segments of `[A-Za-z0-9._-]`, no segment is `.` or `..`
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("empty store key");
    }
    for segment in key.split('/') {
        let valid_chars = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if segment.is_empty() || segment == "." || segment == ".." || !valid_chars {
            bail!("invalid store key: {:?}", key);
        }
    }
    Ok(())
}
