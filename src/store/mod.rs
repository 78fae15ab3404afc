//! Persistent key/value store and the gateway that maps a session onto it.
//!
//! The store carries JSON values only. The session record lives under
//! [`SESSION_KEY`] as an object; binary payloads travel as arrays of
//! integers. Saves merge field by field into whatever is already stored so
//! keys written by someone else survive.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::archive::{ArchiveFormat, Entry};
use crate::build::CompressionPreset;
use crate::error::PersistenceError;
use crate::queue::DownloadQueue;
use crate::session::{BrowseMode, FileRef, Session, SessionState, StaleReason, View};

pub const SESSION_KEY: &str = "archive_session";

/// External persistent store. No schema is enforced here.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Values for the requested keys; missing keys are simply absent.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, PersistenceError>;

    /// Insert or replace the given keys, leaving others untouched.
    async fn set(&self, items: Map<String, Value>) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, PersistenceError> {
        (**self).get(keys).await
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), PersistenceError> {
        (**self).set(items).await
    }
}

/// A staged file as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    pub mime_hint: String,
    pub bytes: Vec<u8>,
}

impl From<&FileRef> for StoredFile {
    fn from(file: &FileRef) -> Self {
        Self {
            name: file.name.clone(),
            mime_hint: file.mime_hint.clone(),
            bytes: file.bytes.to_vec(),
        }
    }
}

impl From<StoredFile> for FileRef {
    fn from(file: StoredFile) -> Self {
        FileRef::new(file.name, file.bytes).with_mime(file.mime_hint)
    }
}

/// Store-safe form of [`SessionState`].
///
/// Every field is optional so a partially written or older record still
/// loads; absent and null mean the same thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecord {
    pub active_view: Option<View>,
    pub archive_name: Option<String>,
    pub archive_format: Option<ArchiveFormat>,
    pub source_bytes: Option<Vec<u8>>,
    pub entries: Option<Vec<Entry>>,
    pub download_queue: Option<DownloadQueue>,
    pub last_opened_path: Option<String>,
    pub build_files: Option<Vec<StoredFile>>,
    pub build_name: Option<String>,
    pub preset: Option<CompressionPreset>,
}

impl SessionRecord {
    /// The full record for a state, binaries included.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            active_view: Some(state.active_view),
            archive_name: state.archive_name.clone(),
            archive_format: state.archive_format,
            source_bytes: state.source_bytes.as_ref().map(|b| b.to_vec()),
            entries: if state.archive_name.is_some() {
                Some(state.entries.iter().cloned().collect())
            } else {
                None
            },
            download_queue: if state.archive_name.is_some() {
                Some(state.download_queue.clone())
            } else {
                None
            },
            last_opened_path: state.last_opened_path.clone(),
            build_files: Some(state.build_files.iter().map(StoredFile::from).collect()),
            build_name: state.build_name.clone(),
            preset: Some(state.preset),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.archive_name.is_none()
            && self.build_files.as_ref().is_none_or(Vec::is_empty)
            && self.build_name.is_none()
    }
}

/// What a save does with the `sourceBytes` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesPolicy {
    Write,
    /// Write null: no archive, or the payload is over the size limit.
    Clear,
    /// Leave the stored value alone. Used after persisted bytes failed to
    /// decode so that restoring does not cost a write.
    Keep,
}

/// Serialize/merge/deserialize boundary between a session and the store.
///
/// Failures are logged and absorbed; nothing here returns an error.
pub struct PersistenceGateway<S> {
    store: S,
    max_persisted_bytes: usize,
}

impl<S: KeyValueStore> PersistenceGateway<S> {
    pub fn new(store: S, max_persisted_bytes: usize) -> Self {
        Self {
            store,
            max_persisted_bytes,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The persisted record, or `None` if there is none or it is unreadable.
    pub async fn load(&self) -> Option<SessionRecord> {
        let mut items = match self.store.get(&[SESSION_KEY]).await {
            Ok(items) => items,
            Err(e) => {
                warn!("session load failed: {}", e);
                return None;
            }
        };
        let value = items.remove(SESSION_KEY)?;
        if value.is_null() {
            return None;
        }
        match serde_json::from_value::<SessionRecord>(value) {
            Ok(record) if record.is_empty() => None,
            Ok(record) => Some(record),
            Err(e) => {
                warn!("persisted session is malformed, ignoring it: {}", e);
                None
            }
        }
    }

    /// Persist the session, merging into the stored record. Returns whether
    /// the write went through.
    pub async fn save(&self, session: &Session) -> bool {
        let policy = self.bytes_policy(session);
        match self.merge(session.state(), policy).await {
            Ok(()) => true,
            Err(e) => {
                warn!("session save failed: {}", e);
                false
            }
        }
    }

    fn bytes_policy(&self, session: &Session) -> BytesPolicy {
        match (&session.state().source_bytes, session.mode()) {
            (Some(bytes), _) if bytes.len() <= self.max_persisted_bytes => BytesPolicy::Write,
            (Some(bytes), _) => {
                debug!(
                    size = bytes.len(),
                    limit = self.max_persisted_bytes,
                    "source bytes too large to persist"
                );
                BytesPolicy::Clear
            }
            (None, BrowseMode::Stale(StaleReason::DecodeFailed(_))) => BytesPolicy::Keep,
            (None, _) => BytesPolicy::Clear,
        }
    }

    async fn merge(&self, state: &SessionState, policy: BytesPolicy) -> Result<(), PersistenceError> {
        let mut patch = match serde_json::to_value(SessionRecord::from_state(state)) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(PersistenceError::WriteFailed("record is not an object".into())),
            Err(e) => return Err(PersistenceError::WriteFailed(e.to_string())),
        };
        match policy {
            BytesPolicy::Write => {}
            BytesPolicy::Clear => {
                patch.insert("sourceBytes".into(), Value::Null);
            }
            BytesPolicy::Keep => {
                patch.remove("sourceBytes");
            }
        }

        let mut current = self.store.get(&[SESSION_KEY]).await?;
        let mut record = match current.remove(SESSION_KEY) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            record.insert(key, value);
        }

        let mut items = Map::new();
        items.insert(SESSION_KEY.to_string(), Value::Object(record));
        self.store.set(items).await?;
        debug!(?policy, "session saved");
        Ok(())
    }
}
