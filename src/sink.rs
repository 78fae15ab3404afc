//! Download sinks: where extracted or built bytes end up.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::SinkError;

/// One payload handed to a sink.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Relative, already sanitized; may contain `/`.
    pub filename: String,
    pub mime_hint: String,
    pub data: Arc<[u8]>,
}

impl Delivery {
    pub fn new(filename: impl Into<String>, mime_hint: impl Into<String>, data: Arc<[u8]>) -> Self {
        Self {
            filename: filename.into(),
            mime_hint: mime_hint.into(),
            data,
        }
    }
}

#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Deliver the payload and return where it landed.
    async fn deliver(&self, delivery: &Delivery) -> Result<String, SinkError>;
}

/// Keep a buffer alive for `grace` after its delivery call returned, so a
/// consumer that reads lazily still finds it.
pub fn retain_for(grace: Duration, data: Arc<[u8]>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        drop(data);
    })
}

/// Writes files under a root directory. Existing files are never
/// overwritten; the new file gets a ` (n)` suffix instead.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// `name.ext` -> `name (n).ext`
fn uniquified(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn deliver(&self, delivery: &Delivery) -> Result<String, SinkError> {
        let fail = |e: std::io::Error| SinkError::delivery_failed(&delivery.filename, e);
        let target = self.root.join(&delivery.filename);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }

        let mut candidate = target.clone();
        let mut n = 0;
        let mut file = loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && n < 10_000 => {
                    n += 1;
                    candidate = uniquified(&target, n);
                }
                Err(e) => return Err(fail(e)),
            }
        };
        file.write_all(&delivery.data).await.map_err(fail)?;
        file.flush().await.map_err(fail)?;
        debug!(path = %candidate.display(), size = delivery.data.len(), "delivered");
        Ok(candidate.display().to_string())
    }
}

/// Writes payloads to stdout, optionally preceded by `--- name ---`.
#[derive(Debug, Default)]
pub struct StdoutSink {
    headers: bool,
    lock: tokio::sync::Mutex<()>,
}

impl StdoutSink {
    pub fn new(headers: bool) -> Self {
        Self {
            headers,
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl DownloadSink for StdoutSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<String, SinkError> {
        let fail = |e: std::io::Error| SinkError::delivery_failed(&delivery.filename, e);
        let _guard = self.lock.lock().await;
        let mut stdout = tokio::io::stdout();
        if self.headers {
            stdout
                .write_all(format!("--- {} ---\n", delivery.filename).as_bytes())
                .await
                .map_err(fail)?;
        }
        stdout.write_all(&delivery.data).await.map_err(fail)?;
        stdout.flush().await.map_err(fail)?;
        Ok("<stdout>".to_string())
    }
}

/// Collects deliveries in memory. Names listed in `reject` fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Delivery>>,
    reject: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(names: &[&str]) -> Self {
        Self {
            delivered: Mutex::default(),
            reject: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DownloadSink for MemorySink {
    async fn deliver(&self, delivery: &Delivery) -> Result<String, SinkError> {
        if self.reject.contains(&delivery.filename) {
            return Err(SinkError::delivery_failed(&delivery.filename, "rejected"));
        }
        self.delivered
            .lock()
            .map_err(|e| SinkError::delivery_failed(&delivery.filename, e))?
            .push(delivery.clone());
        Ok(delivery.filename.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(name: &str, data: &[u8]) -> Delivery {
        Delivery::new(name, "text/plain", Arc::from(data))
    }

    #[test]
    fn uniquified_names() {
        assert_eq!(uniquified(Path::new("a/b.txt"), 2), PathBuf::from("a/b (2).txt"));
        assert_eq!(uniquified(Path::new("Makefile"), 1), PathBuf::from("Makefile (1)"));
    }

    #[tokio::test]
    async fn directory_sink_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        sink.deliver(&delivery("x/a.txt", b"one")).await.unwrap();
        sink.deliver(&delivery("x/a.txt", b"two")).await.unwrap();

        let first = std::fs::read(dir.path().join("x/a.txt")).unwrap();
        let second = std::fs::read(dir.path().join("x/a (1).txt")).unwrap();
        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
    }

    #[tokio::test]
    async fn memory_sink_rejects_listed_names() {
        let sink = MemorySink::rejecting(&["bad"]);
        assert!(sink.deliver(&delivery("bad", b"")).await.is_err());
        sink.deliver(&delivery("good", b"1")).await.unwrap();
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn retained_buffer_outlives_caller() {
        let data: Arc<[u8]> = Arc::from(&b"payload"[..]);
        let task = retain_for(Duration::from_millis(30), data.clone());
        assert_eq!(Arc::strong_count(&data), 2);
        task.await.unwrap();
        assert_eq!(Arc::strong_count(&data), 1);
    }
}
