mod http;
mod memory;

pub use http::HttpSource;
pub use memory::MemoryReader;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// A named payload supplied by the user, either dropped, selected from disk
/// or fetched from a URL.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime_hint: Option<String>,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Read a local file into memory, keeping only its file name.
    pub async fn from_path(path: &std::path::Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self {
            name,
            mime_hint: None,
            bytes,
        })
    }

    /// Resolve a CLI argument that may be a local path or an HTTP(S) URL.
    pub async fn acquire(location: &str) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            HttpSource::new(location.to_string())?.fetch().await
        } else {
            Self::from_path(std::path::Path::new(location)).await
        }
    }
}
