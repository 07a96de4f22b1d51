//! Directory-backed store: key `a/b` lives in `<root>/a/b.json`

use super::{validate_key, ShowStore};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create store directory {:?}", root))?;
        log::debug!("Opened store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        let file = format!(
            "{}.{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            EXTENSION
        );
        path.set_file_name(file);
        Ok(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.extension()?.to_str()? != EXTENSION {
            return None;
        }
        let stem = relative.with_extension("");
        let segments: Vec<String> = stem
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }
}

impl ShowStore for DirStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let value =
            serde_json::from_str(&text).with_context(|| format!("Corrupt store file {:?}", path))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        // write then rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(value).context("Failed to encode store value")?;
        fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {:?} into place", path))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.with_context(|| format!("Failed to list {:?}", self.root))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = self.key_for(entry.path()) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        Ok(true)
    }
}
