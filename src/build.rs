//! Turns staged files into ZIP bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::error::BuildError;
use crate::session::FileRef;
use crate::zip::{WriteOptions, ZipWriter};

/// Deflate level applied to compressible files.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPreset {
    #[default]
    Quick,
    Optimal,
    Maximum,
}

impl fmt::Display for CompressionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Quick => "quick",
            Self::Optimal => "optimal",
            Self::Maximum => "maximum",
        };
        f.write_str(name)
    }
}

impl CompressionPreset {
    pub fn level(self) -> u32 {
        match self {
            Self::Quick => 1,
            Self::Optimal => 6,
            Self::Maximum => 9,
        }
    }
}

/// Extensions whose payload is already entropy-dense.
const PRECOMPRESSED: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "avif", "jxl",
    // video
    "mp4", "m4v", "mov", "avi", "mkv", "webm", "wmv", "flv",
    // audio
    "mp3", "m4a", "aac", "ogg", "oga", "opus", "flac", "wma",
    // archives
    "zip", "rar", "7z", "gz", "tgz", "bz2", "xz", "zst", "lz4", "cab", "jar", "apk",
    // office and e-books (zip containers)
    "docx", "xlsx", "pptx", "odt", "ods", "odp", "epub",
    // fonts
    "woff", "woff2",
];

pub fn is_precompressed(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            PRECOMPRESSED.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Store already-compressed payloads, deflate the rest.
pub fn write_options_for(name: &str, preset: CompressionPreset) -> WriteOptions {
    if is_precompressed(name) {
        WriteOptions::stored()
    } else {
        WriteOptions::deflate(preset.level())
    }
}

/// Make a user-typed archive name safe to hand to the sink.
pub fn sanitize_archive_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "archive.zip".to_string();
    }
    let mut safe: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if !safe.to_ascii_lowercase().ends_with(".zip") {
        safe.push_str(".zip");
    }
    safe
}

#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub files: &'a [FileRef],
    pub archive_name: &'a str,
    pub preset: CompressionPreset,
    pub passphrase: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Encode the staged files. `progress` sees a non-decreasing percentage
/// from 0 to 100.
pub async fn build(
    request: BuildRequest<'_>,
    mut progress: impl FnMut(u8),
) -> Result<BuiltArchive, BuildError> {
    if request.files.is_empty() {
        return Err(BuildError::Empty);
    }

    let codec = |e: anyhow::Error| BuildError::CodecFailure(format!("{:#}", e));
    let mut writer = ZipWriter::new();
    if let Some(passphrase) = request.passphrase {
        writer.set_passphrase(passphrase.as_bytes());
    }

    // Each file weighs at least one byte so empty files still advance.
    let total: u64 = request
        .files
        .iter()
        .map(|f| f.bytes.len().max(1) as u64)
        .sum();
    let mut done = 0u64;
    progress(0);

    for file in request.files {
        let options = write_options_for(&file.name, request.preset);
        debug!(name = %file.name, method = ?options.method, "adding file");
        writer
            .add_file(&file.name, &file.bytes, options)
            .map_err(codec)?;

        done += file.bytes.len().max(1) as u64;
        progress((done * 100 / total) as u8);
        tokio::task::yield_now().await;
    }

    let bytes = writer.finish().map_err(codec)?;
    let name = sanitize_archive_name(request.archive_name);
    info!(%name, files = request.files.len(), size = bytes.len(), "archive built");
    Ok(BuiltArchive { name, bytes })
}
