//! Uniform archive handles over the supported codecs.
//!
//! An [`ArchiveHandle`] owns the source bytes of one opened archive plus its
//! decoded representation, and answers `entries()` / `read_entry()` the same
//! way whatever the format. [`ArchiveAdapter`] is the single slot a session
//! keeps its handle in: opening a new archive closes the previous one.

mod entry;
mod tarball;

pub use entry::{Entry, EntryIndex, glob_match, is_junk, normalize_path};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{DecodeError, EntryError};
use crate::io::MemoryReader;
use crate::zip::{ZipExtractor, ZipFileEntry};

use self::tarball::TarContents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Rar,
    #[serde(rename = "7z")]
    SevenZ,
    Tar,
}

impl ArchiveFormat {
    /// Guess from a file name's extension.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return Some(Self::Tar);
        }
        match lower.rsplit_once('.')?.1 {
            "zip" => Some(Self::Zip),
            "rar" => Some(Self::Rar),
            "7z" => Some(Self::SevenZ),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }

    /// Guess from leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b'P', b'K', 0x03, 0x04, ..] | [b'P', b'K', 0x05, 0x06, ..] => Some(Self::Zip),
            [b'R', b'a', b'r', b'!', 0x1A, 0x07, ..] => Some(Self::Rar),
            [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, ..] => Some(Self::SevenZ),
            [0x1F, 0x8B, ..] => Some(Self::Tar),
            _ if bytes.len() >= 262 && &bytes[257..262] == b"ustar" => Some(Self::Tar),
            _ => None,
        }
    }

    pub fn has_decoder(self) -> bool {
        matches!(self, Self::Zip | Self::Tar)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Zip => "zip",
            Self::Rar => "rar",
            Self::SevenZ => "7z",
            Self::Tar => "tar",
        })
    }
}

enum Backend {
    Zip {
        extractor: ZipExtractor<MemoryReader>,
        members: HashMap<String, ZipFileEntry>,
    },
    Tar(TarContents),
}

struct HandleInner {
    name: String,
    format: ArchiveFormat,
    source: Arc<[u8]>,
    backend: Backend,
    index: EntryIndex,
    encrypted: bool,
    passphrase: Mutex<Option<Vec<u8>>>,
    closed: AtomicBool,
}

/// A live, decoded archive.
///
/// Clones share the same decoder; closing any of them closes all, and
/// readers still holding a clone get [`EntryError::HandleClosed`].
#[derive(Clone)]
pub struct ArchiveHandle {
    inner: Arc<HandleInner>,
}

impl ArchiveHandle {
    /// Decode `source`. The hint wins over magic-byte sniffing; without
    /// either, the bytes are treated as corrupted.
    pub async fn decode(
        name: &str,
        source: Arc<[u8]>,
        hint: Option<ArchiveFormat>,
    ) -> Result<Self, DecodeError> {
        let format = hint
            .or_else(|| ArchiveFormat::sniff(&source))
            .ok_or_else(|| DecodeError::Corrupted("unrecognized archive format".to_string()))?;
        if !format.has_decoder() {
            return Err(DecodeError::UnsupportedFormat(format.to_string()));
        }

        let (backend, raw_entries, encrypted) = match format {
            ArchiveFormat::Zip => {
                let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(source.clone())));
                let files = extractor
                    .list_files()
                    .await
                    .map_err(|e| DecodeError::Corrupted(format!("{:#}", e)))?;
                let encrypted = files.iter().any(|f| f.is_encrypted());
                let raw: Vec<Entry> = files
                    .iter()
                    .map(|f| Entry {
                        path: f.file_name.clone(),
                        is_directory: f.is_directory,
                        uncompressed_size: Some(f.uncompressed_size),
                        source_format: ArchiveFormat::Zip,
                    })
                    .collect();
                let mut members = HashMap::with_capacity(files.len());
                for f in files {
                    members.entry(normalize_path(&f.file_name)).or_insert(f);
                }
                (Backend::Zip { extractor, members }, raw, encrypted)
            }
            _ => {
                let tar = TarContents::decode(&source)?;
                let raw: Vec<Entry> = tar.entries().collect();
                (Backend::Tar(tar), raw, false)
            }
        };

        let index = EntryIndex::build(raw_entries);
        debug!(name, %format, entries = index.len(), encrypted, "archive decoded");

        Ok(Self {
            inner: Arc::new(HandleInner {
                name: name.to_string(),
                format,
                source,
                backend,
                index,
                encrypted,
                passphrase: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn format(&self) -> ArchiveFormat {
        self.inner.format
    }

    pub fn source_bytes(&self) -> &Arc<[u8]> {
        &self.inner.source
    }

    pub fn entries(&self) -> &EntryIndex {
        &self.inner.index
    }

    pub fn requires_passphrase(&self) -> bool {
        self.inner.encrypted
    }

    pub fn has_passphrase(&self) -> bool {
        self.passphrase().is_some()
    }

    pub fn set_passphrase(&self, secret: &str) {
        if let Ok(mut slot) = self.inner.passphrase.lock() {
            *slot = Some(secret.as_bytes().to_vec());
        }
    }

    fn passphrase(&self) -> Option<Vec<u8>> {
        self.inner.passphrase.lock().ok().and_then(|p| p.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop serving reads. The decoder is freed once the last clone drops.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(name = %self.inner.name, "archive handle closed");
        }
    }

    /// Read one file entry. Repeated reads return identical bytes.
    pub async fn read_entry(&self, path: &str) -> Result<Vec<u8>, EntryError> {
        if self.is_closed() {
            return Err(EntryError::HandleClosed);
        }
        if !self.inner.index.contains_file(path) {
            return Err(EntryError::NotFound(path.to_string()));
        }

        match &self.inner.backend {
            Backend::Zip { extractor, members } => {
                let member = members
                    .get(path)
                    .ok_or_else(|| EntryError::NotFound(path.to_string()))?;
                let passphrase = self.passphrase();
                extractor
                    .extract_to_memory(member, passphrase.as_deref())
                    .await
            }
            Backend::Tar(tar) => tar
                .read(path)
                .ok_or_else(|| EntryError::NotFound(path.to_string())),
        }
    }
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("name", &self.inner.name)
            .field("format", &self.inner.format)
            .field("entries", &self.inner.index.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The one handle slot a session owns.
#[derive(Default)]
pub struct ArchiveAdapter {
    current: Option<ArchiveHandle>,
}

impl ArchiveAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a new archive and make it current, closing the previous one.
    ///
    /// An encrypted archive still becomes current but the call reports
    /// [`DecodeError::Encrypted`]; supply the secret with
    /// [`set_passphrase`](Self::set_passphrase) before reading entries. A
    /// decode failure leaves the previous handle untouched.
    pub async fn open(
        &mut self,
        name: &str,
        bytes: Arc<[u8]>,
        hint: Option<ArchiveFormat>,
    ) -> Result<&ArchiveHandle, DecodeError> {
        let handle = ArchiveHandle::decode(name, bytes, hint).await?;
        self.close();
        let locked = handle.requires_passphrase() && !handle.has_passphrase();
        let handle = self.current.insert(handle);
        if locked {
            return Err(DecodeError::Encrypted);
        }
        Ok(handle)
    }

    pub fn current(&self) -> Option<&ArchiveHandle> {
        self.current.as_ref()
    }

    pub fn set_passphrase(&self, secret: &str) -> Result<(), EntryError> {
        let handle = self.current.as_ref().ok_or(EntryError::HandleClosed)?;
        handle.set_passphrase(secret);
        Ok(())
    }

    pub async fn read_entry(&self, path: &str) -> Result<Vec<u8>, EntryError> {
        match &self.current {
            Some(handle) => handle.read_entry(path).await,
            None => Err(EntryError::HandleClosed),
        }
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.close();
        }
    }
}

impl Drop for ArchiveAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{WriteOptions, ZipWriter};

    fn zip_bytes(files: &[(&str, &[u8])], passphrase: Option<&str>) -> Arc<[u8]> {
        let mut writer = ZipWriter::new();
        if let Some(p) = passphrase {
            writer.set_passphrase(p.as_bytes());
        }
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(name).unwrap();
            } else {
                writer.add_file(name, data, WriteOptions::deflate(1)).unwrap();
            }
        }
        Arc::from(writer.finish().unwrap())
    }

    #[test]
    fn formats_from_names_and_magic() {
        assert_eq!(ArchiveFormat::from_name("A.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("x.tar.gz"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_name("x.7z"), Some(ArchiveFormat::SevenZ));
        assert_eq!(ArchiveFormat::from_name("notes.txt"), None);
        assert_eq!(ArchiveFormat::sniff(b"Rar!\x1a\x07\x01\x00"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"hello"), None);
    }

    #[tokio::test]
    async fn zip_entries_are_indexed_and_readable() {
        let bytes = zip_bytes(
            &[("b.txt", b"bee"), ("a/", b""), ("a/c.txt", b"sea"), ("__MACOSX/._b.txt", b"x")],
            None,
        );
        let handle = ArchiveHandle::decode("t.zip", bytes, Some(ArchiveFormat::Zip))
            .await
            .unwrap();
        let paths: Vec<_> = handle.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["a/", "a/c.txt", "b.txt"]);

        let first = handle.read_entry("a/c.txt").await.unwrap();
        let second = handle.read_entry("a/c.txt").await.unwrap();
        assert_eq!(first, b"sea");
        assert_eq!(first, second);

        assert_eq!(
            handle.read_entry("__MACOSX/._b.txt").await,
            Err(EntryError::NotFound("__MACOSX/._b.txt".to_string()))
        );
        assert!(matches!(handle.read_entry("a/").await, Err(EntryError::NotFound(_))));
    }

    #[tokio::test]
    async fn truncated_zip_is_corrupted() {
        let bytes = zip_bytes(&[("a.txt", b"some text to pad the archive")], None);
        let truncated: Arc<[u8]> = Arc::from(&bytes[..bytes.len() / 2]);
        let err = ArchiveHandle::decode("t.zip", truncated, Some(ArchiveFormat::Zip))
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Corrupted(_)));
    }

    #[tokio::test]
    async fn rar_and_7z_are_unsupported() {
        let err = ArchiveHandle::decode("x.rar", Arc::from(&b"Rar!\x1a\x07\x00"[..]), None)
            .await
            .unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedFormat("rar".to_string()));
        let err = ArchiveHandle::decode("x.7z", Arc::from(&b"junk"[..]), Some(ArchiveFormat::SevenZ))
            .await
            .unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedFormat("7z".to_string()));
    }

    #[tokio::test]
    async fn tar_archives_open_through_the_same_contract() {
        let bytes = tarball::tests::tar_bytes(&[("z.txt", b"zed"), ("._z.txt", b"junk")]);
        let handle = ArchiveHandle::decode("t.tar", Arc::from(bytes), None).await.unwrap();
        assert_eq!(handle.format(), ArchiveFormat::Tar);
        assert_eq!(handle.entries().len(), 1);
        assert_eq!(handle.read_entry("z.txt").await.unwrap(), b"zed");
    }

    #[tokio::test]
    async fn reads_after_close_fail() {
        let bytes = zip_bytes(&[("a.txt", b"a")], None);
        let mut adapter = ArchiveAdapter::new();
        let straggler = adapter.open("t.zip", bytes, None).await.unwrap().clone();
        adapter.close();
        assert_eq!(straggler.read_entry("a.txt").await, Err(EntryError::HandleClosed));
        assert_eq!(adapter.read_entry("a.txt").await, Err(EntryError::HandleClosed));
    }

    #[tokio::test]
    async fn opening_a_second_archive_closes_the_first() {
        let mut adapter = ArchiveAdapter::new();
        let first = adapter
            .open("one.zip", zip_bytes(&[("1.txt", b"1")], None), None)
            .await
            .unwrap()
            .clone();
        adapter
            .open("two.zip", zip_bytes(&[("2.txt", b"2")], None), None)
            .await
            .unwrap();
        assert!(first.is_closed());
        assert_eq!(adapter.read_entry("2.txt").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn failed_open_keeps_previous_handle() {
        let mut adapter = ArchiveAdapter::new();
        adapter
            .open("one.zip", zip_bytes(&[("1.txt", b"1")], None), None)
            .await
            .unwrap();
        let err = adapter
            .open("bad.zip", Arc::from(&b"PK\x03\x04garbage"[..]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Corrupted(_)));
        assert_eq!(adapter.read_entry("1.txt").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn encrypted_open_then_passphrase() {
        let bytes = zip_bytes(&[("s.txt", b"secret")], Some("pw"));
        let mut adapter = ArchiveAdapter::new();
        let err = adapter.open("s.zip", bytes, None).await.unwrap_err();
        assert_eq!(err, DecodeError::Encrypted);

        adapter.set_passphrase("nope").unwrap();
        assert_eq!(
            adapter.read_entry("s.txt").await,
            Err(EntryError::WrongPassphrase("s.txt".to_string()))
        );
        adapter.set_passphrase("pw").unwrap();
        assert_eq!(adapter.read_entry("s.txt").await.unwrap(), b"secret");
    }
}
