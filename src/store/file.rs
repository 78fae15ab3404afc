use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::error::PersistenceError;

/// A JSON object in one file. Writes go through a sibling temp file and a
/// rename so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, PersistenceError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(PersistenceError::ReadFailed(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PersistenceError::ReadFailed(format!(
                "{}: top level is not an object",
                self.path.display()
            ))),
            Err(e) => Err(PersistenceError::ReadFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, PersistenceError> {
        let mut all = self.read_all().await?;
        Ok(keys
            .iter()
            .filter_map(|k| all.remove(*k).map(|v| (k.to_string(), v)))
            .collect())
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let write_err = |e: std::io::Error| {
            PersistenceError::WriteFailed(format!("{}: {}", self.path.display(), e))
        };

        // An unreadable file is replaced rather than blocking every save.
        let mut all = self.read_all().await.unwrap_or_default();
        all.extend(items);
        let text = serde_json::to_vec(&Value::Object(all))
            .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, text).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.get(&["a"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        store
            .set(Map::from_iter([("a".to_string(), json!(1)), ("b".to_string(), json!("x"))]))
            .await
            .unwrap();
        store
            .set(Map::from_iter([("a".to_string(), json!([1, 2]))]))
            .await
            .unwrap();
        let got = store.get(&["a", "b", "c"]).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["a"], json!([1, 2]));
        assert_eq!(got["b"], json!("x"));
    }

    #[tokio::test]
    async fn garbage_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get(&["a"]).await,
            Err(PersistenceError::ReadFailed(_))
        ));
    }
}
