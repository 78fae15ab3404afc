use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Mutex;

use super::KeyValueStore;
use crate::error::PersistenceError;

/// In-process store. `failing()` builds one whose every call errors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Map<String, Value>>,
    fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            items: Mutex::default(),
            fail: true,
        }
    }

    /// Copy of everything stored.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.items.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, PersistenceError> {
        if self.fail {
            return Err(PersistenceError::ReadFailed("store unavailable".into()));
        }
        let items = self
            .items
            .lock()
            .map_err(|e| PersistenceError::ReadFailed(e.to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|k| items.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, new_items: Map<String, Value>) -> Result<(), PersistenceError> {
        if self.fail {
            return Err(PersistenceError::WriteFailed("store unavailable".into()));
        }
        let mut items = self
            .items
            .lock()
            .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
        items.extend(new_items);
        Ok(())
    }
}
