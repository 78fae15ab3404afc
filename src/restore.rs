//! Reconciles a persisted record into a usable session on activation.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveAdapter, ArchiveFormat, EntryIndex};
use crate::error::DecodeError;
use crate::session::{BrowseMode, FileRef, QueuePolicy, Session, SessionState, StaleReason, View};
use crate::store::SessionRecord;

/// Which branch restoration took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restoration {
    /// Nothing persisted; the session starts empty.
    NoRecord,
    /// The user was composing; staged files are back and nothing was decoded.
    Build,
    Live,
    /// Decoded, waiting for a passphrase.
    Locked,
    Stale(StaleReason),
}

/// Run the restoration protocol over a loaded record.
///
/// Never writes to the store. The same record always yields the same
/// session.
pub async fn restore(record: Option<SessionRecord>) -> (Session, Restoration) {
    let Some(record) = record else {
        debug!("no persisted session");
        return (Session::new(), Restoration::NoRecord);
    };

    let entries = EntryIndex::build(record.entries.unwrap_or_default());
    let mut download_queue = record.download_queue.unwrap_or_default();
    download_queue.retain_files_of(&entries);
    let last_opened_path = record
        .last_opened_path
        .filter(|p| entries.contains_file(p));
    let source_bytes: Option<Arc<[u8]>> = record.source_bytes.map(Arc::from);

    let state = SessionState {
        active_view: record.active_view.unwrap_or_default(),
        archive_format: record
            .archive_format
            .or_else(|| record.archive_name.as_deref().and_then(ArchiveFormat::from_name)),
        archive_name: record.archive_name,
        source_bytes,
        entries,
        download_queue,
        last_opened_path,
        build_files: record
            .build_files
            .unwrap_or_default()
            .into_iter()
            .map(FileRef::from)
            .collect(),
        build_name: record.build_name,
        preset: record.preset.unwrap_or_default(),
    };

    let (session, outcome) = reconcile(state).await;
    info!(outcome = ?outcome, "session restored");
    (session, outcome)
}

async fn reconcile(state: SessionState) -> (Session, Restoration) {
    let Some(name) = state.archive_name.clone() else {
        return (
            Session::from_parts(state, ArchiveAdapter::new(), BrowseMode::Idle),
            Restoration::Build,
        );
    };

    let Some(bytes) = state.source_bytes.clone() else {
        return stale(state, StaleReason::BytesMissing);
    };

    if state.active_view == View::Build {
        // Decode lazily, on the first byte-level browse action.
        let mode = BrowseMode::Stale(StaleReason::NotDecoded);
        return (
            Session::from_parts(state, ArchiveAdapter::new(), mode),
            Restoration::Build,
        );
    }

    let format = state.archive_format;
    let mut session = Session::from_parts(state, ArchiveAdapter::new(), BrowseMode::Idle);
    let outcome = match session.attach(&name, bytes, format, QueuePolicy::Revalidate).await {
        Ok(()) => Restoration::Live,
        // Unlike other decode failures, an encrypted archive is not stale: the
        // bytes decode, only the passphrase is missing, so they stay attached
        // and `unlock` can resume without re-supplying the file.
        Err(DecodeError::Encrypted) => Restoration::Locked,
        Err(e) => {
            warn!(archive = %name, "persisted archive no longer decodes: {}", e);
            // A failed attach leaves the metadata from the record in place.
            let mut state = session.state().clone();
            state.source_bytes = None;
            return stale(state, StaleReason::DecodeFailed(e));
        }
    };
    session.mark_clean();
    (session, outcome)
}

fn stale(state: SessionState, reason: StaleReason) -> (Session, Restoration) {
    let mode = BrowseMode::Stale(reason.clone());
    (
        Session::from_parts(state, ArchiveAdapter::new(), mode),
        Restoration::Stale(reason),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Entry;
    use crate::zip::{WriteOptions, ZipWriter};

    fn zip_of(paths: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new();
        for path in paths {
            writer
                .add_file(path, path.as_bytes(), WriteOptions::deflate(1))
                .unwrap();
        }
        writer.finish().unwrap()
    }

    fn record(paths: &[&str], bytes: Option<Vec<u8>>) -> SessionRecord {
        SessionRecord {
            active_view: Some(View::Browse),
            archive_name: Some("x.zip".into()),
            archive_format: Some(ArchiveFormat::Zip),
            source_bytes: bytes,
            entries: Some(
                paths
                    .iter()
                    .map(|p| Entry {
                        path: p.to_string(),
                        is_directory: false,
                        uncompressed_size: None,
                        source_format: ArchiveFormat::Zip,
                    })
                    .collect(),
            ),
            download_queue: Some(paths.iter().map(|p| p.to_string()).collect()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_record_gives_empty_session() {
        let (session, outcome) = restore(None).await;
        assert_eq!(outcome, Restoration::NoRecord);
        assert_eq!(session.state(), &SessionState::default());
    }

    #[tokio::test]
    async fn bytes_decode_to_live_session() {
        let paths = ["a", "b", "c"];
        let mut rec = record(&paths, Some(zip_of(&paths)));
        rec.download_queue = Some(["c".to_string(), "gone".to_string()].into_iter().collect());
        rec.last_opened_path = Some("gone".into());
        let (session, outcome) = restore(Some(rec)).await;
        assert_eq!(outcome, Restoration::Live);
        assert_eq!(session.state().download_queue.to_vec(), ["c"]);
        assert_eq!(session.state().last_opened_path, None);
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn encrypted_bytes_stay_attached_and_locked() {
        let mut writer = ZipWriter::new();
        writer.set_passphrase(b"hunter2");
        writer.add_file("a", b"secret", WriteOptions::deflate(1)).unwrap();
        let bytes = writer.finish().unwrap();

        let (mut session, outcome) = restore(Some(record(&["a"], Some(bytes)))).await;
        assert_eq!(outcome, Restoration::Locked);
        assert_eq!(session.mode(), &BrowseMode::Locked);
        assert!(session.state().source_bytes.is_some());

        session.unlock("hunter2").unwrap();
        assert_eq!(&*session.open_entry("a").await.unwrap().bytes, b"secret");
    }

    #[tokio::test]
    async fn missing_bytes_give_stale_session() {
        let (mut session, outcome) = restore(Some(record(&["a", "b"], None))).await;
        assert_eq!(outcome, Restoration::Stale(StaleReason::BytesMissing));
        assert_eq!(session.state().entries.len(), 2);
        assert!(matches!(
            session.open_entry("a").await,
            Err(crate::error::SessionError::SourceRequired(_))
        ));
    }

    #[tokio::test]
    async fn undecodable_bytes_are_deterministic() {
        let mut bytes = zip_of(&["a", "b"]);
        bytes.truncate(bytes.len() / 2);
        let rec = record(&["a", "b"], Some(bytes));

        let (first, outcome1) = restore(Some(rec.clone())).await;
        let (second, outcome2) = restore(Some(rec)).await;
        assert!(matches!(
            outcome1,
            Restoration::Stale(StaleReason::DecodeFailed(DecodeError::Corrupted(_)))
        ));
        assert_eq!(outcome1, outcome2);
        assert_eq!(first.state(), second.state());
        assert_eq!(first.state().source_bytes, None);
        assert_eq!(first.state().entries.len(), 2);
    }

    #[tokio::test]
    async fn build_record_skips_decoding() {
        let mut rec = record(&["a"], Some(zip_of(&["a"])));
        rec.active_view = Some(View::Build);
        rec.build_files = Some(vec![crate::store::StoredFile {
            name: "n.txt".into(),
            mime_hint: "text/plain".into(),
            bytes: vec![1, 2],
        }]);
        let (mut session, outcome) = restore(Some(rec)).await;
        assert_eq!(outcome, Restoration::Build);
        assert_eq!(session.mode(), &BrowseMode::Stale(StaleReason::NotDecoded));
        assert_eq!(&*session.state().build_files[0].bytes, &[1, 2]);

        // The first byte-level action decodes the held bytes.
        assert_eq!(session.open_entry("a").await.unwrap().bytes, b"a");
        assert_eq!(session.mode(), &BrowseMode::Live);
    }
}
