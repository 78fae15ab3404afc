//! The one aggregate every user action mutates and every flush persists.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::archive::{ArchiveAdapter, ArchiveFormat, ArchiveHandle, EntryIndex};
use crate::build::CompressionPreset;
use crate::error::{DecodeError, EntryError, SessionError};
use crate::mime;
use crate::queue::DownloadQueue;

/// Which half of the surface is showing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Build,
    Browse,
}

/// A file staged for the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    pub mime_hint: String,
    pub bytes: Arc<[u8]>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime_hint = mime::hint_for(&name);
        Self {
            name,
            mime_hint,
            bytes: Arc::from(bytes),
        }
    }

    pub fn with_mime(mut self, mime_hint: impl Into<String>) -> Self {
        self.mime_hint = mime_hint.into();
        self
    }
}

/// Durable fields of a session.
///
/// When `source_bytes` is present, `entries` was produced by decoding them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub active_view: View,
    pub archive_name: Option<String>,
    pub archive_format: Option<ArchiveFormat>,
    pub source_bytes: Option<Arc<[u8]>>,
    pub entries: EntryIndex,
    pub download_queue: DownloadQueue,
    pub last_opened_path: Option<String>,
    pub build_files: Vec<FileRef>,
    pub build_name: Option<String>,
    pub preset: CompressionPreset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Bytes are held but were not decoded (restored while composing).
    /// The first byte-level action decodes them without asking the user.
    NotDecoded,
    /// The persisted record carried metadata only.
    BytesMissing,
    /// The persisted bytes no longer decode.
    DecodeFailed(DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BrowseMode {
    #[default]
    Idle,
    Live,
    /// Decoded, but entries are encrypted and no passphrase was given yet.
    Locked,
    Stale(StaleReason),
}

/// How the download queue follows a newly attached archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueuePolicy {
    /// New archive: queue every file.
    Reseed,
    /// Same archive supplied again: keep the user's choices that still exist.
    Revalidate,
}

#[derive(Debug, Clone)]
pub struct OpenedEntry {
    pub path: String,
    pub mime_hint: String,
    pub bytes: Vec<u8>,
}

pub struct Session {
    state: SessionState,
    adapter: ArchiveAdapter,
    mode: BrowseMode,
    dirty: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::from_parts(SessionState::default(), ArchiveAdapter::new(), BrowseMode::Idle)
    }

    pub(crate) fn from_parts(
        state: SessionState,
        adapter: ArchiveAdapter,
        mode: BrowseMode,
    ) -> Self {
        Self {
            state,
            adapter,
            mode,
            dirty: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> &BrowseMode {
        &self.mode
    }

    pub fn handle(&self) -> Option<&ArchiveHandle> {
        self.adapter.current()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn touch(&mut self) {
        self.dirty = true;
    }

    // ---- build view ----

    /// Stage a file. A file with the same name is replaced in place.
    pub fn stage_file(&mut self, file: FileRef) {
        match self.state.build_files.iter_mut().find(|f| f.name == file.name) {
            Some(existing) => *existing = file,
            None => self.state.build_files.push(file),
        }
        self.state.active_view = View::Build;
        self.touch();
    }

    pub fn unstage(&mut self, name: &str) -> bool {
        let before = self.state.build_files.len();
        self.state.build_files.retain(|f| f.name != name);
        let removed = self.state.build_files.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn set_build_name(&mut self, name: &str) {
        self.state.build_name = Some(name.to_string());
        self.touch();
    }

    pub fn set_preset(&mut self, preset: CompressionPreset) {
        self.state.preset = preset;
        self.touch();
    }

    pub fn set_view(&mut self, view: View) {
        if self.state.active_view != view {
            self.state.active_view = view;
            self.touch();
        }
    }

    // ---- browse view ----

    /// Open an archive the user just supplied.
    ///
    /// Supplying the bytes of the archive a stale session already shows
    /// keeps the queue the user curated; any other archive reseeds it.
    /// Decode failures are returned without touching the session.
    pub async fn open_archive(
        &mut self,
        name: &str,
        bytes: Vec<u8>,
        passphrase: Option<&str>,
    ) -> Result<(), SessionError> {
        let policy = match (&self.mode, &self.state.archive_name) {
            (BrowseMode::Stale(_), Some(current)) if current == name => QueuePolicy::Revalidate,
            _ => QueuePolicy::Reseed,
        };
        let hint = ArchiveFormat::from_name(name);

        let result = self.attach(name, Arc::from(bytes), hint, policy).await;
        match result {
            Ok(()) => {}
            Err(DecodeError::Encrypted) => match passphrase {
                Some(secret) => self.unlock(secret)?,
                None => {
                    self.state.active_view = View::Browse;
                    return Err(DecodeError::Encrypted.into());
                }
            },
            Err(e) => return Err(e.into()),
        }
        self.state.active_view = View::Browse;
        info!(name, entries = self.state.entries.len(), "archive opened");
        Ok(())
    }

    /// Attach the passphrase to the current archive.
    pub fn unlock(&mut self, secret: &str) -> Result<(), SessionError> {
        match self.mode {
            BrowseMode::Live | BrowseMode::Locked => {
                self.adapter.set_passphrase(secret)?;
                self.mode = BrowseMode::Live;
                Ok(())
            }
            BrowseMode::Stale(_) => Err(SessionError::SourceRequired(self.archive_label())),
            BrowseMode::Idle => Err(SessionError::NoArchive),
        }
    }

    pub(crate) async fn attach(
        &mut self,
        name: &str,
        bytes: Arc<[u8]>,
        hint: Option<ArchiveFormat>,
        policy: QueuePolicy,
    ) -> Result<(), DecodeError> {
        let opened = self.adapter.open(name, bytes, hint).await.cloned();
        let (handle, mode, result) = match opened {
            Ok(handle) => (handle, BrowseMode::Live, Ok(())),
            Err(DecodeError::Encrypted) => match self.adapter.current() {
                Some(handle) => (handle.clone(), BrowseMode::Locked, Err(DecodeError::Encrypted)),
                None => return Err(DecodeError::Encrypted),
            },
            Err(e) => return Err(e),
        };

        self.state.archive_name = Some(name.to_string());
        self.state.archive_format = Some(handle.format());
        self.state.source_bytes = Some(handle.source_bytes().clone());
        self.state.entries = handle.entries().clone();
        match policy {
            QueuePolicy::Reseed => {
                self.state.download_queue = DownloadQueue::seeded(&self.state.entries);
                self.state.last_opened_path = None;
            }
            QueuePolicy::Revalidate => {
                self.state.download_queue.retain_files_of(&self.state.entries);
                if let Some(last) = &self.state.last_opened_path {
                    if !self.state.entries.contains_file(last) {
                        self.state.last_opened_path = None;
                    }
                }
            }
        }
        debug!(name, ?mode, "archive attached");
        self.mode = mode;
        self.touch();
        result
    }

    /// A live handle for byte-level work.
    ///
    /// Bytes restored without decoding are decoded here; a stale session
    /// without usable bytes asks for the archive again.
    pub async fn live_handle(&mut self) -> Result<ArchiveHandle, SessionError> {
        match &self.mode {
            BrowseMode::Idle => Err(SessionError::NoArchive),
            BrowseMode::Live => self.adapter.current().cloned().ok_or(SessionError::NoArchive),
            BrowseMode::Locked => Err(DecodeError::Encrypted.into()),
            BrowseMode::Stale(StaleReason::NotDecoded) => {
                let (Some(name), Some(bytes)) =
                    (self.state.archive_name.clone(), self.state.source_bytes.clone())
                else {
                    return Err(SessionError::SourceRequired(self.archive_label()));
                };
                match self
                    .attach(&name, bytes, self.state.archive_format, QueuePolicy::Revalidate)
                    .await
                {
                    Ok(()) => self.adapter.current().cloned().ok_or(SessionError::NoArchive),
                    Err(DecodeError::Encrypted) => Err(DecodeError::Encrypted.into()),
                    Err(e) => {
                        self.state.source_bytes = None;
                        self.mode = BrowseMode::Stale(StaleReason::DecodeFailed(e.clone()));
                        Err(e.into())
                    }
                }
            }
            BrowseMode::Stale(_) => Err(SessionError::SourceRequired(self.archive_label())),
        }
    }

    /// Read one entry for viewing and remember it as the last opened.
    pub async fn open_entry(&mut self, path: &str) -> Result<OpenedEntry, SessionError> {
        self.check_file(path)?;
        let handle = self.live_handle().await?;
        let bytes = handle.read_entry(path).await?;
        self.state.last_opened_path = Some(path.to_string());
        self.touch();
        Ok(OpenedEntry {
            path: path.to_string(),
            mime_hint: mime::hint_for(path),
            bytes,
        })
    }

    fn check_file(&self, path: &str) -> Result<(), SessionError> {
        if self.state.archive_name.is_none() {
            return Err(SessionError::NoArchive);
        }
        match self.state.entries.get(path) {
            None => Err(EntryError::NotFound(path.to_string()).into()),
            Some(e) if e.is_directory => Err(SessionError::IsDirectory(path.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn archive_label(&self) -> String {
        self.state
            .archive_name
            .clone()
            .unwrap_or_else(|| "archive".to_string())
    }

    // ---- download queue ----

    pub fn queue_add(&mut self, path: &str) -> Result<bool, SessionError> {
        self.check_file(path)?;
        let added = self.state.download_queue.add(path);
        if added {
            self.touch();
        }
        Ok(added)
    }

    /// Queue every file whose path matches a glob pattern.
    pub fn queue_add_matching(&mut self, pattern: &str) -> usize {
        let matches: Vec<String> = self
            .state
            .entries
            .matching(pattern)
            .filter(|e| !e.is_directory)
            .map(|e| e.path.clone())
            .collect();
        let added = matches
            .iter()
            .filter(|p| self.state.download_queue.add(p))
            .count();
        if added > 0 {
            self.touch();
        }
        added
    }

    pub fn queue_remove(&mut self, path: &str) -> bool {
        let removed = self.state.download_queue.remove(path);
        if removed {
            self.touch();
        }
        removed
    }

    pub fn queue_clear(&mut self) {
        if !self.state.download_queue.is_empty() {
            self.state.download_queue.clear();
            self.touch();
        }
    }

    pub fn queue_select_all(&mut self) {
        self.state.download_queue = DownloadQueue::seeded(&self.state.entries);
        self.touch();
    }

    /// Discard everything. Pipelines still holding the old handle fail
    /// with `HandleClosed`.
    pub fn clear(&mut self) {
        self.adapter.close();
        self.state = SessionState::default();
        self.mode = BrowseMode::Idle;
        self.touch();
        info!("session cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{WriteOptions, ZipWriter};

    pub(crate) fn zip_of(paths: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new();
        for path in paths {
            if path.ends_with('/') {
                writer.add_directory(path).unwrap();
            } else {
                writer
                    .add_file(path, format!("contents of {}", path).as_bytes(), WriteOptions::deflate(1))
                    .unwrap();
            }
        }
        writer.finish().unwrap()
    }

    #[tokio::test]
    async fn opening_reseeds_queue_and_switches_view() {
        let mut session = Session::new();
        session
            .open_archive("one.zip", zip_of(&["a", "d/", "d/b"]), None)
            .await
            .unwrap();
        assert_eq!(session.mode(), &BrowseMode::Live);
        assert_eq!(session.state().active_view, View::Browse);
        assert_eq!(session.state().download_queue.to_vec(), ["a", "d/b"]);

        session.queue_remove("a");
        session
            .open_archive("two.zip", zip_of(&["x", "y"]), None)
            .await
            .unwrap();
        assert_eq!(session.state().download_queue.to_vec(), ["x", "y"]);
        assert!(session.is_dirty());
    }

    #[tokio::test]
    async fn queue_rejects_directories_and_unknown_paths() {
        let mut session = Session::new();
        assert!(matches!(session.queue_add("a"), Err(SessionError::NoArchive)));
        session
            .open_archive("one.zip", zip_of(&["a", "d/"]), None)
            .await
            .unwrap();
        assert!(matches!(session.queue_add("d/"), Err(SessionError::IsDirectory(_))));
        assert!(matches!(
            session.queue_add("nope"),
            Err(SessionError::Entry(EntryError::NotFound(_)))
        ));
        assert!(!session.queue_add("a").unwrap());
    }

    #[tokio::test]
    async fn glob_queueing() {
        let mut session = Session::new();
        session
            .open_archive("one.zip", zip_of(&["a.txt", "b.txt", "c.md"]), None)
            .await
            .unwrap();
        session.queue_clear();
        assert_eq!(session.queue_add_matching("*.txt"), 2);
        assert_eq!(session.state().download_queue.to_vec(), ["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn interactive_open_of_truncated_bytes_is_an_error() {
        let mut session = Session::new();
        let mut bytes = zip_of(&["a", "b"]);
        bytes.truncate(bytes.len() - 10);
        let err = session.open_archive("t.zip", bytes, None).await.unwrap_err();
        assert!(matches!(err, SessionError::Decode(DecodeError::Corrupted(_))));
        assert_eq!(session.mode(), &BrowseMode::Idle);
        assert!(session.state().archive_name.is_none());
    }

    #[tokio::test]
    async fn open_entry_records_last_opened() {
        let mut session = Session::new();
        session
            .open_archive("one.zip", zip_of(&["notes.txt"]), None)
            .await
            .unwrap();
        let opened = session.open_entry("notes.txt").await.unwrap();
        assert_eq!(opened.bytes, b"contents of notes.txt");
        assert_eq!(opened.mime_hint, "text/plain");
        assert_eq!(session.state().last_opened_path.as_deref(), Some("notes.txt"));
    }

    #[tokio::test]
    async fn staging_replaces_same_name() {
        let mut session = Session::new();
        session.stage_file(FileRef::new("a.txt", b"1".to_vec()));
        session.stage_file(FileRef::new("b.txt", b"2".to_vec()));
        session.stage_file(FileRef::new("a.txt", b"3".to_vec()));
        let names: Vec<_> = session.state().build_files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(&*session.state().build_files[0].bytes, b"3");
        assert!(session.unstage("b.txt"));
        assert!(!session.unstage("b.txt"));
    }

    #[tokio::test]
    async fn clear_closes_the_handle() {
        let mut session = Session::new();
        session
            .open_archive("one.zip", zip_of(&["a"]), None)
            .await
            .unwrap();
        let straggler = session.live_handle().await.unwrap();
        session.clear();
        assert_eq!(session.state(), &SessionState::default());
        assert_eq!(straggler.read_entry("a").await, Err(EntryError::HandleClosed));
        assert!(matches!(session.live_handle().await, Err(SessionError::NoArchive)));
    }

    #[tokio::test]
    async fn encrypted_archive_waits_for_passphrase() {
        let mut writer = ZipWriter::new();
        writer.set_passphrase(b"pw");
        writer.add_file("s.txt", b"secret", WriteOptions::stored()).unwrap();
        let bytes = writer.finish().unwrap();

        let mut session = Session::new();
        let err = session.open_archive("s.zip", bytes, None).await.unwrap_err();
        assert!(matches!(err, SessionError::Decode(DecodeError::Encrypted)));
        assert_eq!(session.mode(), &BrowseMode::Locked);
        assert_eq!(session.state().download_queue.to_vec(), ["s.txt"]);

        session.unlock("pw").unwrap();
        assert_eq!(session.open_entry("s.txt").await.unwrap().bytes, b"secret");
    }
}
