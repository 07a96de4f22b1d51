use super::{validate_key, ShowStore};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// In-process store, lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl ShowStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        validate_key(key)?;
        self.entries()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.entries()?.remove(key).is_some())
    }
}
