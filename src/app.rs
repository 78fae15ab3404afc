//! One surface activation: restore, run commands, flush, tear down.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use crate::archive::{ArchiveFormat, glob_match};
use crate::build::{BuildRequest, build};
use crate::cli::{Command, QueueAction, ShellLine, has_glob_chars, split_words};
use crate::config::Settings;
use crate::error::{DecodeError, SessionError};
use crate::extract::{archive_stem, extract_entries, sanitize_entry_path};
use crate::flush::Flusher;
use crate::io::SourceFile;
use crate::mime;
use crate::restore::{Restoration, restore};
use crate::session::{BrowseMode, FileRef, Session, StaleReason, View};
use crate::sink::{Delivery, DirectorySink, DownloadSink, StdoutSink, retain_for};
use crate::store::{KeyValueStore, PersistenceGateway};

pub struct App<S: KeyValueStore + 'static> {
    settings: Settings,
    session: Arc<Mutex<Session>>,
    flusher: Flusher<S>,
    restoration: Restoration,
}

impl<S: KeyValueStore + 'static> App<S> {
    /// Load the persisted record and restore the session from it.
    pub async fn activate(settings: Settings, store: S) -> Self {
        let gateway = Arc::new(PersistenceGateway::new(store, settings.max_persisted_bytes));
        let (session, restoration) = restore(gateway.load().await).await;
        debug!(?restoration, "surface activated");
        let session = Arc::new(Mutex::new(session));
        let flusher = Flusher::new(session.clone(), gateway);
        Self {
            settings,
            session,
            flusher,
            restoration,
        }
    }

    pub fn restoration(&self) -> &Restoration {
        &self.restoration
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        self.session.clone()
    }

    /// Run one command, then flush whether or not it succeeded.
    pub async fn run(&mut self, command: Command) -> Result<()> {
        let result = match command {
            Command::Shell => self.shell().await,
            other => self.dispatch(other).await,
        };
        self.flusher.flush().await;
        result
    }

    pub async fn teardown(self) {
        self.flusher.teardown().await;
    }

    async fn shell(&mut self) -> Result<()> {
        self.flusher.start_periodic(self.settings.flush_interval);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            if !self.settings.quiet {
                stdout.write_all(b"zipsession> ").await?;
                stdout.flush().await?;
            }
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };

            let words = match split_words(&line) {
                Ok(words) => words,
                Err(e) => {
                    eprintln!("error: {}", e);
                    continue;
                }
            };
            match words.first().map(String::as_str) {
                None => continue,
                Some("exit" | "quit") => break,
                Some(_) => {}
            }
            let command = match ShellLine::try_parse_from(&words) {
                Ok(parsed) => parsed.command,
                Err(e) => {
                    e.print()?;
                    continue;
                }
            };
            if command == Command::Shell {
                eprintln!("error: already in a shell");
                continue;
            }
            if let Err(e) = self.dispatch(command).await {
                eprintln!("error: {:#}", e);
            }
            self.flusher.flush().await;
        }

        self.flusher.stop_periodic();
        Ok(())
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        let mut session = self.session.lock().await;
        let quiet = self.settings.quiet;

        match command {
            Command::Status => print_status(&session),

            Command::Add { sources } => {
                for source in sources {
                    let file = SourceFile::acquire(&source)
                        .await
                        .with_context(|| format!("failed to read {}", source))?;
                    if !quiet {
                        println!("  adding: {} ({})", file.name, format_size(file.bytes.len() as u64));
                    }
                    let mut staged = FileRef::new(file.name, file.bytes);
                    if let Some(hint) = file.mime_hint {
                        staged = staged.with_mime(hint);
                    }
                    session.stage_file(staged);
                }
            }

            Command::Unstage { names } => {
                for name in names {
                    if !session.unstage(&name) {
                        eprintln!("not staged: {}", name);
                    }
                }
            }

            Command::Name { name } => session.set_build_name(&name),

            Command::Preset { preset } => session.set_preset(preset),

            Command::Build { password, pipe } => {
                let state = session.state();
                let name = state.build_name.clone().unwrap_or_default();
                let request = BuildRequest {
                    files: &state.build_files,
                    archive_name: &name,
                    preset: state.preset,
                    passphrase: password.as_deref(),
                };
                let show_progress = !quiet && !pipe;
                let built = build(request, |percent| {
                    if show_progress {
                        eprint!("\r  building: {:>3}%", percent);
                    }
                })
                .await?;
                if show_progress {
                    eprintln!();
                }

                let delivery = Delivery::new(built.name, "application/zip", Arc::from(built.bytes));
                let location = if pipe {
                    StdoutSink::new(false).deliver(&delivery).await?
                } else {
                    DirectorySink::new(&self.settings.out_dir)
                        .deliver(&delivery)
                        .await?
                };
                retain_for(self.settings.download_grace, delivery.data);
                if !quiet && !pipe {
                    println!("  created: {}", location);
                }
            }

            Command::Open { source, password } => {
                let file = SourceFile::acquire(&source)
                    .await
                    .with_context(|| format!("failed to read {}", source))?;

                let format = ArchiveFormat::from_name(&file.name)
                    .or_else(|| ArchiveFormat::sniff(&file.bytes));
                if let Some(format) = format.filter(|f| !f.has_decoder()) {
                    // No decoder: hand the archive over untouched.
                    let delivery = Delivery::new(
                        sanitize_entry_path(&file.name),
                        mime::hint_for(&file.name),
                        Arc::from(file.bytes),
                    );
                    let location = DirectorySink::new(&self.settings.out_dir)
                        .deliver(&delivery)
                        .await?;
                    retain_for(self.settings.download_grace, delivery.data);
                    println!("{} archives cannot be browsed; saved as-is to {}", format, location);
                    return Ok(());
                }

                let name = file.name;
                match session.open_archive(&name, file.bytes, password.as_deref()).await {
                    Ok(()) => {
                        if !quiet {
                            let state = session.state();
                            println!(
                                "  opened: {} ({} entries, {} queued)",
                                name,
                                state.entries.len(),
                                state.download_queue.len()
                            );
                        }
                    }
                    Err(SessionError::Decode(DecodeError::Encrypted)) => {
                        println!("{} is encrypted; run `unlock <password>` to read it", name);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Command::Unlock { password } => session.unlock(&password)?,

            Command::Ls { verbose, pattern } => print_listing(&session, verbose, pattern.as_deref()),

            Command::Queue { action } => queue_action(&mut session, action, quiet)?,

            Command::Extract { pipe } => {
                let handle = session.live_handle().await?;
                let paths = session.state().download_queue.to_vec();
                if paths.is_empty() {
                    bail!("the download queue is empty");
                }
                let sink: Arc<dyn DownloadSink> = if pipe {
                    Arc::new(StdoutSink::new(paths.len() > 1))
                } else {
                    Arc::new(DirectorySink::new(&self.settings.out_dir))
                };
                let report =
                    extract_entries(&handle, &paths, sink, self.settings.download_grace).await;

                for (path, e) in &report.skipped {
                    eprintln!("  skipped: {}: {}", path, e);
                }
                if !quiet && !pipe {
                    println!("  extracted {} of {} entries", report.succeeded, report.attempted);
                }
                if !report.failed_deliveries.is_empty() {
                    bail!(
                        "{} entries could not be saved; run extract again to retry",
                        report.failed_deliveries.len()
                    );
                }
            }

            Command::Show { path } => {
                let opened = session.open_entry(&path).await?;
                if mime::is_viewable(&opened.mime_hint) {
                    if let Ok(text) = std::str::from_utf8(&opened.bytes) {
                        print!("{}", text);
                        return Ok(());
                    }
                }
                let stem = session
                    .state()
                    .archive_name
                    .as_deref()
                    .map(archive_stem)
                    .unwrap_or_default();
                let delivery = Delivery::new(
                    sanitize_entry_path(&format!("{}/{}", stem, opened.path)),
                    opened.mime_hint,
                    Arc::from(opened.bytes),
                );
                let location = DirectorySink::new(&self.settings.out_dir)
                    .deliver(&delivery)
                    .await?;
                retain_for(self.settings.open_grace, delivery.data);
                println!("  saved: {}", location);
            }

            Command::Cat { path } => {
                let opened = session.open_entry(&path).await?;
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&opened.bytes).await?;
                stdout.flush().await?;
            }

            Command::View { view } => session.set_view(view),

            Command::Clear => {
                session.clear();
                if !quiet {
                    println!("session cleared");
                }
            }

            Command::Shell => bail!("already in a shell"),
        }
        Ok(())
    }
}

fn queue_action(session: &mut Session, action: QueueAction, quiet: bool) -> Result<()> {
    match action {
        QueueAction::Add { paths } => {
            for path in paths {
                if has_glob_chars(&path) {
                    let added = session.queue_add_matching(&path);
                    if !quiet {
                        println!("  queued {} entries matching {}", added, path);
                    }
                } else if !session.queue_add(&path)? && !quiet {
                    println!("  already queued: {}", path);
                }
            }
        }
        QueueAction::Remove { paths } => {
            for path in paths {
                if has_glob_chars(&path) {
                    let matching: Vec<String> = session
                        .state()
                        .download_queue
                        .iter()
                        .filter(|p| glob_match(&path, p))
                        .map(str::to_string)
                        .collect();
                    for p in &matching {
                        session.queue_remove(p);
                    }
                    if !quiet {
                        println!("  unqueued {} entries matching {}", matching.len(), path);
                    }
                } else if !session.queue_remove(&path) && !quiet {
                    println!("  not queued: {}", path);
                }
            }
        }
        QueueAction::Clear => session.queue_clear(),
        QueueAction::All => {
            if session.state().archive_name.is_none() {
                return Err(SessionError::NoArchive.into());
            }
            session.queue_select_all();
        }
    }
    Ok(())
}

fn describe_mode(mode: &BrowseMode) -> String {
    match mode {
        BrowseMode::Idle => "closed".to_string(),
        BrowseMode::Live => "live".to_string(),
        BrowseMode::Locked => "locked, run `unlock <password>`".to_string(),
        BrowseMode::Stale(StaleReason::NotDecoded) => "held, decoded on first use".to_string(),
        BrowseMode::Stale(StaleReason::BytesMissing) => {
            "stale, run `open <file>` again to read entries".to_string()
        }
        BrowseMode::Stale(StaleReason::DecodeFailed(e)) => {
            format!("stale ({}), run `open <file>` again to read entries", e)
        }
    }
}

fn print_status(session: &Session) {
    let state = session.state();
    let view = match state.active_view {
        View::Build => "build",
        View::Browse => "browse",
    };
    println!("view: {}", view);

    let staged: u64 = state.build_files.iter().map(|f| f.bytes.len() as u64).sum();
    let target = crate::build::sanitize_archive_name(state.build_name.as_deref().unwrap_or_default());
    println!(
        "build: {} files, {} -> {} ({})",
        state.build_files.len(),
        format_size(staged),
        target,
        state.preset
    );
    for file in &state.build_files {
        println!("  {:>10}  {}", file.bytes.len(), file.name);
    }

    match &state.archive_name {
        Some(name) => {
            let format = state
                .archive_format
                .map(|f| f.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "archive: {} [{}] {}, {} entries ({}), {} queued",
                name,
                format,
                describe_mode(session.mode()),
                state.entries.len(),
                format_size(state.entries.total_size()),
                state.download_queue.len()
            );
        }
        None => println!("archive: none"),
    }
    if let Some(last) = &state.last_opened_path {
        println!("last opened: {}", last);
    }
}

fn print_listing(session: &Session, verbose: bool, pattern: Option<&str>) {
    let state = session.state();
    let entries = state
        .entries
        .iter()
        .filter(|e| pattern.is_none_or(|p| glob_match(p, &e.path)));

    if verbose {
        println!("{:>10}  {:>1}  Name", "Length", "Q");
        println!("{}", "-".repeat(40));
    }

    let mut total = 0u64;
    let mut file_count = 0usize;
    for entry in entries {
        let queued = if state.download_queue.contains(&entry.path) { "*" } else { " " };
        if verbose {
            let size = entry
                .uncompressed_size
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{:>10}  {}  {}", size, queued, entry.path);
            if !entry.is_directory {
                total += entry.uncompressed_size.unwrap_or(0);
                file_count += 1;
            }
        } else {
            println!("{} {}", queued, entry.path);
        }
    }

    if verbose {
        println!("{}", "-".repeat(40));
        println!("{:>10}     {} files", total, file_count);
    }
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SESSION_KEY};

    fn settings(out: &std::path::Path) -> Settings {
        Settings {
            out_dir: out.to_path_buf(),
            quiet: true,
            ..Settings::default()
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[tokio::test]
    async fn commands_are_flushed_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, b"hello").unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut app = App::activate(settings(dir.path()), store.clone()).await;
        assert_eq!(app.restoration(), &Restoration::NoRecord);
        app.run(Command::Add {
            sources: vec![input.display().to_string()],
        })
        .await
        .unwrap();
        app.run(Command::Name { name: "bundle".into() }).await.unwrap();
        app.teardown().await;
        assert!(store.snapshot().contains_key(SESSION_KEY));

        let mut app = App::activate(settings(dir.path()), store.clone()).await;
        assert_eq!(app.restoration(), &Restoration::Build);
        app.run(Command::Build { password: None, pipe: false }).await.unwrap();
        let built = std::fs::read(dir.path().join("bundle.zip")).unwrap();

        app.run(Command::Open {
            source: dir.path().join("bundle.zip").display().to_string(),
            password: None,
        })
        .await
        .unwrap();
        app.run(Command::Extract { pipe: false }).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("bundle/notes.txt")).unwrap(), b"hello");
        {
            let session = app.session();
            let session = session.lock().await;
            assert_eq!(session.state().active_view, View::Browse);
            assert_eq!(&*session.state().source_bytes.clone().unwrap(), &built[..]);
        }
        app.teardown().await;
    }

    #[tokio::test]
    async fn unsupported_archives_are_saved_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("src").join("old.rar");
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        std::fs::write(&input, b"Rar!\x1a\x07\x00junk").unwrap();

        let mut app = App::activate(settings(dir.path()), MemoryStore::new()).await;
        app.run(Command::Open {
            source: input.display().to_string(),
            password: None,
        })
        .await
        .unwrap();
        assert!(dir.path().join("old.rar").exists());
        assert_eq!(app.session().lock().await.mode(), &BrowseMode::Idle);
    }

    #[tokio::test]
    async fn extract_without_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::activate(settings(dir.path()), MemoryStore::new()).await;
        let err = app.run(Command::Extract { pipe: false }).await.unwrap_err();
        assert!(err.to_string().contains("no archive"));
    }
}
