//! Hands every queued entry to a download sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::archive::ArchiveHandle;
use crate::error::{EntryError, SinkError};
use crate::mime;
use crate::sink::{Delivery, DownloadSink, retain_for};

/// Replaces a `..` segment in an output path.
pub const PARENT_PLACEHOLDER: &str = "__";

/// Output name for a file entry whose path sanitizes to nothing.
pub const UNNAMED_PLACEHOLDER: &str = "unnamed";

/// Make an entry path safe to use as a relative output path.
///
/// Leading slashes are stripped, backslashes become `/`, empty and `.`
/// segments are dropped and `..` segments are replaced by
/// [`PARENT_PLACEHOLDER`].
pub fn sanitize_entry_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| if s == ".." { PARENT_PLACEHOLDER } else { s })
        .collect::<Vec<_>>()
        .join("/")
}

/// Archive name without its archive extension, used as the output folder.
pub fn archive_stem(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    for ext in [".tar.gz", ".tgz", ".zip", ".tar", ".rar", ".7z"] {
        if lower.ends_with(ext) && lower.len() > ext.len() {
            return &name[..name.len() - ext.len()];
        }
    }
    name
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Entries that could not be read.
    pub skipped: Vec<(String, EntryError)>,
    /// Entries that were read but the sink refused.
    pub failed_deliveries: Vec<SinkError>,
}

impl ExtractReport {
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }
}

/// Read each path in order and dispatch it to the sink.
///
/// Reads are sequential against the handle. Deliveries run concurrently
/// and are joined before returning. A failing entry is counted and skipped.
pub async fn extract_entries<K>(
    handle: &ArchiveHandle,
    paths: &[String],
    sink: Arc<K>,
    grace: Duration,
) -> ExtractReport
where
    K: DownloadSink + ?Sized + 'static,
{
    let stem = sanitize_entry_path(archive_stem(handle.name()));
    let mut report = ExtractReport {
        attempted: paths.len(),
        ..Default::default()
    };
    let mut deliveries = JoinSet::new();

    for path in paths {
        let bytes = match handle.read_entry(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%path, "skipping entry: {}", e);
                report.skipped.push((path.clone(), e));
                continue;
            }
        };

        let mut relative = sanitize_entry_path(path);
        if relative.is_empty() {
            relative = UNNAMED_PLACEHOLDER.to_string();
        }
        let filename = if stem.is_empty() {
            relative
        } else {
            format!("{}/{}", stem, relative)
        };
        let delivery = Delivery::new(filename, mime::hint_for(path), Arc::from(bytes));
        let sink = sink.clone();
        deliveries.spawn(async move {
            let result = sink.deliver(&delivery).await;
            retain_for(grace, delivery.data);
            result
        });
    }

    while let Some(joined) = deliveries.join_next().await {
        match joined {
            Ok(Ok(location)) => {
                debug!(%location, "entry delivered");
                report.succeeded += 1;
            }
            Ok(Err(e)) => {
                warn!("{}", e);
                report.failed_deliveries.push(e);
            }
            Err(e) => report
                .failed_deliveries
                .push(SinkError::delivery_failed("<delivery task>", e)),
        }
    }

    info!(
        archive = handle.name(),
        attempted = report.attempted,
        succeeded = report.succeeded,
        "extraction finished"
    );
    report
}
