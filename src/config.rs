use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

/// How long a delivered buffer stays alive after a download.
pub const DOWNLOAD_GRACE: Duration = Duration::from_secs(3);
/// How long a buffer handed to a viewer stays alive.
pub const OPEN_GRACE: Duration = Duration::from_secs(10);

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub state_file: PathBuf,
    pub out_dir: PathBuf,
    pub flush_interval: Duration,
    pub max_persisted_bytes: usize,
    pub download_grace: Duration,
    pub open_grace: Duration,
    pub quiet: bool,
}

impl Settings {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub fn default_log_filter(cli: &Cli) -> &'static str {
        if cli.debug {
            "zipsession=debug"
        } else if cli.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

impl From<&Cli> for Settings {
    fn from(cli: &Cli) -> Self {
        Self {
            state_file: cli.state_file.clone(),
            out_dir: cli.out_dir.clone(),
            flush_interval: Duration::from_secs(cli.flush_interval_secs.max(1)),
            max_persisted_bytes: cli.max_persisted_bytes,
            download_grace: DOWNLOAD_GRACE,
            open_grace: OPEN_GRACE,
            quiet: cli.quiet,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(".zipsession.json"),
            out_dir: PathBuf::from("."),
            flush_interval: Duration::from_secs(5),
            max_persisted_bytes: 64 * 1024 * 1024,
            download_grace: DOWNLOAD_GRACE,
            open_grace: OPEN_GRACE,
            quiet: false,
        }
    }
}
