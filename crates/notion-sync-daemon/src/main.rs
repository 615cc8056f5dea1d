//! notion-sync: Publishes Obsidian notes to a Notion database.
//!
//! Uses notion-sync-core for change tracking and page replacement, with the
//! native filesystem and the Notion HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use notion_sync_core::{FlushScheduler, NotionClient, SyncContext};
use notion_sync_daemon::{
    Cli, Command, FileWatcher, LogClipboard, NativeFs, expand_tilde, load_settings, log_notices,
};

type Scheduler = FlushScheduler<NativeFs, NotionClient>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "debug,notion_sync_core=debug,notion_sync_daemon=debug"
    } else {
        "info,notion_sync_core=info,notion_sync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let vault = expand_tilde(&cli.vault);
    let vault = vault
        .canonicalize()
        .with_context(|| format!("Vault not found: {}", vault.display()))?;

    let settings = load_settings(cli.config.as_deref(), &cli.overrides)?;
    settings.validate()?;

    let client = NotionClient::from_settings(&settings)?;
    let fs = Arc::new(NativeFs::new(vault.clone()));
    let scheduler = FlushScheduler::new(
        SyncContext::new(fs, client, settings).with_clipboard(LogClipboard),
    );
    let _notices = log_notices(&scheduler.context().events);

    match cli.command {
        Command::Push { file } => push(&scheduler, &vault, &file).await,
        Command::Run => run(&scheduler, vault).await,
    }
}

/// Publish one note right away.
async fn push(scheduler: &Scheduler, vault: &Path, file: &str) -> Result<()> {
    let path = vault_relative(vault, file)?;
    info!("Publishing {}", path);

    let report = scheduler.engine().sync(&path).await?;
    println!("{}", report.url);
    Ok(())
}

/// Watch, flush and scan until Ctrl+C.
async fn run(scheduler: &Scheduler, vault: PathBuf) -> Result<()> {
    let settings = &scheduler.context().settings;
    info!("Vault path: {:?}", vault);
    info!(
        "Publishing folder {:?} every {:?}",
        settings.folder,
        scheduler.flush_interval()
    );

    let bound = scheduler.prime_cache().await?;
    info!("{} note(s) already bound to a page", bound);

    let mut watcher = FileWatcher::new(vault, &settings.folder)?;
    info!("File watcher started");

    let mut flush_timer = interval(scheduler.flush_interval());
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing is pending yet
    flush_timer.tick().await;

    // Scan right away to catch edits made while we were not running
    let mut scan_timer = interval(scheduler.flush_interval());
    scan_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                scheduler.record(event).await;
            }

            _ = flush_timer.tick() => {
                let report = scheduler.flush().await;
                if report.total() == 0 {
                    debug!("Flush tick: nothing pending");
                }
            }

            _ = scan_timer.tick() => {
                if let Err(e) = scheduler.scan().await {
                    warn!("Folder scan failed: {}", e);
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Pending changes are not persisted across restarts
    if !scheduler.tracker().is_empty() {
        info!("Flushing {} pending change(s) before exit", scheduler.tracker().len());
        scheduler.flush().await;
    }

    info!("Shutting down");
    Ok(())
}

/// Accept a note path relative to the vault or an absolute path inside it.
fn vault_relative(vault: &Path, file: &str) -> Result<String> {
    let path = Path::new(file);
    let relative = if path.is_absolute() {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("Note not found: {}", file))?;
        canonical
            .strip_prefix(vault)
            .with_context(|| format!("{} is outside the vault", file))?
            .to_path_buf()
    } else {
        path.to_path_buf()
    };

    let parts: Vec<String> = relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}
