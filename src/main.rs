//! # Gov News Watch
//!
//! Watches a public news listing page, remembers which items it has already
//! reported, and mails new ones either as they appear or as one daily
//! digest.
//!
//! ## Features
//!
//! - Scrapes the listing with priority-ordered selectors and a link-scan
//!   fallback
//! - Persists seen-item identities to a JSON file that survives restarts
//! - Real-time or batch delivery over SMTP (implicit TLS on 465, STARTTLS
//!   otherwise)
//! - Cron-driven checks with single-flight protection
//!
//! ## Usage
//!
//! ```sh
//! gov_news_watch                      # watch with settings from .env
//! gov_news_watch check-config         # report on settings and exit
//! gov_news_watch scrape --limit 10    # print what the scraper sees
//! gov_news_watch check-once --dry-run # list unseen items without mailing
//! gov_news_watch trim --keep 500      # shrink the seen-item store
//! ```
//!
//! ## Architecture
//!
//! 1. **Scrape**: [`scrapers::listing`] turns the listing page into items
//! 2. **Filter**: [`storage::DedupStore`] drops items already seen
//! 3. **Deliver**: [`notify::email`] mails new items (or queues them)
//! 4. **Schedule**: [`scheduler::Orchestrator`] runs the above on timers

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod models;
mod notify;
mod scheduler;
mod scrapers;
mod storage;
mod utils;

use cli::{Cli, Command, SettingsArgs};
use config::{Settings, check_config, load_settings_file};
use error::NewsError;
use notify::email::EmailNotifier;
use scheduler::{DrainOutcome, Orchestrator};
use scrapers::NewsSource;
use scrapers::listing::ListingScraper;
use storage::DedupStore;
use utils::{display_publish_time, squash_whitespace, truncate_for_log};

const PREVIEW_CHARS: usize = 80;
/// How long shutdown waits for a running check.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }

    // Parse CLI
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Command::Run);
    debug!(?command, config = ?cli.config, "Parsed CLI arguments");

    let raw = match cli.config.as_deref() {
        Some(path) => cli.settings.clone().or(load_settings_file(path)?),
        None => cli.settings.clone(),
    };

    let result = match command {
        Command::CheckConfig => {
            let report = check_config(&raw);
            print!("{}", report.render());
            if !report.ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Run => run(raw).await,
        Command::Scrape { limit } => scrape(raw, limit).await,
        Command::CheckOnce { dry_run } => check_once(raw, dry_run).await,
        Command::Trim { keep } => trim(raw, keep).await,
    };

    if let Err(e) = result {
        error!(error = %e, fatal = e.is_fatal_at_startup(), "Exiting on error");
        return Err(e.into());
    }
    Ok(())
}

/// Long-running watch until SIGINT or SIGTERM.
async fn run(raw: SettingsArgs) -> Result<(), NewsError> {
    let orchestrator = build_orchestrator(raw, true).await?;
    info!(mode = %orchestrator.mode(), "news watcher starting up");
    orchestrator.start().await?;

    let flush = wait_for_shutdown().await;
    orchestrator.stop().await;
    if !orchestrator.wait_for_idle(SHUTDOWN_GRACE).await {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "A check was still running at exit and was abandoned"
        );
    }

    if flush {
        match orchestrator.flush_queue().await {
            DrainOutcome::Restored { count } => {
                warn!(count, "Queued items could not be sent before exit and are lost")
            }
            outcome => debug!(?outcome, "Batch queue flushed"),
        }
    }

    let status = orchestrator.status().await;
    info!(
        state = ?status.state,
        seen = status.store.total_count,
        last_update = ?status.store.last_update,
        "news watcher stopped"
    );
    Ok(())
}

/// Resolves on the first shutdown signal. Returns whether the batch queue
/// should be flushed: SIGINT flushes, SIGTERM exits right away.
async fn wait_for_shutdown() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupt received; shutting down");
                        true
                    }
                    _ = term.recv() => {
                        info!("Terminate received; shutting down without flushing");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM; only Ctrl-C will stop the watcher");
                ctrl_c().await
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> bool {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Interrupt received; shutting down");
    true
}

/// Wire scraper, store and notifier together. `verify` checks the SMTP
/// login before returning.
async fn build_orchestrator(
    raw: SettingsArgs,
    verify: bool,
) -> Result<Arc<Orchestrator>, NewsError> {
    let settings = Settings::resolve(raw)?;
    let scraper = ListingScraper::new(&settings.listing_url)?;
    let notifier = EmailNotifier::new(&settings.smtp, &scraper.site().listing_url)?;
    if verify {
        notifier.verify().await?;
    }
    let store = DedupStore::initialize(&settings.data_file).await?;
    info!(
        path = %store.path().display(),
        seen = store.stats().total_count,
        "Seen-item store ready"
    );

    Ok(Arc::new(Orchestrator::new(
        Arc::new(scraper),
        Arc::new(notifier),
        store,
        settings.schedule,
    )))
}

async fn scrape(raw: SettingsArgs, limit: usize) -> Result<(), NewsError> {
    let settings = Settings::resolve(raw)?;
    let scraper = ListingScraper::new(&settings.listing_url)?;
    let items = scraper.fetch().await?;

    println!("Extracted {} items from {}", items.len(), scraper.site().listing_url);
    for (index, item) in items.iter().take(limit).enumerate() {
        println!("{}. {}", index + 1, item.title);
        println!("   id:      {}", item.identity());
        println!("   link:    {}", item.link);
        println!("   time:    {}", display_publish_time(item.publish_time.as_deref()));
        if !item.summary.is_empty() {
            println!(
                "   summary: {}",
                truncate_for_log(&squash_whitespace(&item.summary), PREVIEW_CHARS)
            );
        }
    }
    Ok(())
}

async fn check_once(raw: SettingsArgs, dry_run: bool) -> Result<(), NewsError> {
    if dry_run {
        let settings = Settings::resolve(raw)?;
        let scraper = ListingScraper::new(&settings.listing_url)?;
        let store = DedupStore::initialize(&settings.data_file).await?;
        let candidates = scraper.fetch().await?;
        let fresh = store.filter_new(&candidates);

        println!(
            "{} of {} items are new (dry run, nothing sent or stored)",
            fresh.len(),
            candidates.len()
        );
        for item in &fresh {
            println!("  - {} ({})", truncate_for_log(&item.title, PREVIEW_CHARS), item.link);
        }
        return Ok(());
    }

    let orchestrator = build_orchestrator(raw, false).await?;
    let outcome = orchestrator.manual_check().await?;
    println!("Check result: {outcome:?}");

    if orchestrator.status().await.batch_queue_len > 0 {
        info!("Batch mode: sending the queue now since this process is about to exit");
        println!("Batch drain: {:?}", orchestrator.flush_queue().await);
    }

    let status = orchestrator.status().await;
    println!(
        "Store holds {} items, last updated {}",
        status.store.total_count,
        status
            .store
            .last_update
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn trim(raw: SettingsArgs, keep: usize) -> Result<(), NewsError> {
    let settings = Settings::resolve(raw)?;
    let mut store = DedupStore::initialize(&settings.data_file).await?;
    let removed = store.trim(keep).await?;
    println!(
        "Removed {removed} entries, {} remain in {}",
        store.stats().total_count,
        store.path().display()
    );
    Ok(())
}
