//! Main entry point for the zipsession CLI application.
//!
//! Every invocation is one activation of the session: the persisted state is
//! restored, the command runs, and the state is flushed back before exit.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zipsession::{App, Cli, JsonFileStore, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Settings::default_log_filter(&cli)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let settings = Settings::from(&cli);
    let store = JsonFileStore::new(&settings.state_file);
    let mut app = App::activate(settings, store).await;

    // Teardown flushes even when the command failed.
    let result = app.run(cli.command()).await;
    app.teardown().await;
    result
}
