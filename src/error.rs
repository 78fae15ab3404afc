//! Error taxonomy shared by every component.
//!
//! Persistence errors are absorbed where they happen. Decode and entry errors
//! degrade the session (stale mode, per-entry skips). Build and sink errors
//! are reported to the user as retryable.

use thiserror::Error;

/// Failure to turn source bytes into a live archive handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("archive is corrupted: {0}")]
    Corrupted(String),

    #[error("no decoder registered for {0} archives")]
    UnsupportedFormat(String),

    #[error("archive is encrypted, a passphrase is required")]
    Encrypted,
}

/// Failure to read a single entry from a handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("wrong passphrase for entry: {0}")]
    WrongPassphrase(String),

    #[error("archive handle is closed")]
    HandleClosed,

    #[error("failed to decode entry '{path}': {reason}")]
    Unreadable { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no files to archive")]
    Empty,

    #[error("archive encoding failed: {0}")]
    CodecFailure(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read persisted state: {0}")]
    ReadFailed(String),

    #[error("failed to write persisted state: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Error)]
#[error("failed to deliver '{filename}': {reason}")]
pub struct SinkError {
    pub filename: String,
    pub reason: String,
}

impl SinkError {
    pub fn delivery_failed(filename: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            filename: filename.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by user actions on a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Stale mode: the archive bytes must be supplied again first.
    #[error("'{0}' must be reopened before its contents can be read")]
    SourceRequired(String),

    #[error("no archive is open")]
    NoArchive,

    #[error("'{0}' is a directory")]
    IsDirectory(String),
}
