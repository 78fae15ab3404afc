//! # zipsession
//!
//! Build ZIP archives from loose files and browse or extract existing
//! archives, with the whole working state kept in a session that survives
//! the process going away at any moment.
//!
//! The [`Session`] aggregate owns everything a user has done so far: the
//! files staged for a build, the open archive, its entry listing and the
//! download queue. A [`PersistenceGateway`] merges it into a key/value
//! store, and [`restore`] rebuilds it on the next activation, falling back
//! to a stale listing when the archive bytes are gone or no longer decode.
//!
//! ## Features
//!
//! - ZIP read (STORED, DEFLATE, ZIP64, traditional PKWARE encryption)
//! - ZIP write with per-file store/deflate choice and optional encryption
//! - TAR and gzip-compressed TAR read
//! - Sources from the local filesystem or HTTP URLs
//!
//! ## Example
//!
//! ```no_run
//! use zipsession::{MemoryStore, PersistenceGateway, Session, restore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = PersistenceGateway::new(MemoryStore::new(), 64 << 20);
//!     let (mut session, _) = restore(gateway.load().await).await;
//!
//!     let bytes = std::fs::read("archive.zip")?;
//!     session.open_archive("archive.zip", bytes, None).await?;
//!     for entry in session.state().entries.iter() {
//!         println!("{}", entry.path);
//!     }
//!
//!     gateway.save(&session).await;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod archive;
pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod flush;
pub mod io;
pub mod mime;
pub mod queue;
pub mod restore;
pub mod session;
pub mod sink;
pub mod store;
pub mod zip;

pub use app::App;
pub use archive::{ArchiveAdapter, ArchiveFormat, ArchiveHandle, Entry, EntryIndex};
pub use build::{BuildRequest, BuiltArchive, CompressionPreset, build};
pub use cli::Cli;
pub use config::Settings;
pub use error::{BuildError, DecodeError, EntryError, PersistenceError, SessionError, SinkError};
pub use extract::{ExtractReport, extract_entries, sanitize_entry_path};
pub use flush::Flusher;
pub use io::{ReadAt, SourceFile};
pub use queue::DownloadQueue;
pub use restore::{Restoration, restore};
pub use session::{BrowseMode, FileRef, Session, SessionState, StaleReason, View};
pub use sink::{Delivery, DirectorySink, DownloadSink, MemorySink, StdoutSink};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, PersistenceGateway, SessionRecord};
