//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest media harvester.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use std::path::PathBuf;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::crawler::run_crawl;
use sumi_harvest::storage::{find_zero_byte_files, JsonStore, StateStore, StorePaths};
use sumi_harvest::StopReason;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a resumable media harvester
///
/// Sumi-Harvest walks the listing of a tag query on a booru-style site and
/// downloads each item's media asset exactly once. Interrupted runs resume
/// from the first page that still has unprocessed items.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable media harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Override the tag query from the configuration
    #[arg(long)]
    tags: Option<String>,

    /// Override the root download directory
    #[arg(long, value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Override the number of concurrent fetch workers
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=32))]
    workers: Option<u32>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Load state and reconcile it against disk, then print what a crawl would start from
    #[arg(long)]
    dry_run: bool,

    /// Forget every processed item before crawling
    #[arg(long)]
    reset_processed: bool,

    /// Delete zero-byte media files in the destination before crawling
    #[arg(long)]
    cleanup_empty: bool,

    /// Do not ask for confirmation before deleting files
    #[arg(short, long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    apply_overrides(&mut config, &cli);

    let destination = config.destination_dir();
    std::fs::create_dir_all(&destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    let mut store = JsonStore::load(
        StorePaths {
            processed: config.processed_path(),
            fetched: config.fetched_path(),
        },
        &destination,
        &config.site.media_extensions,
    );

    let report = store
        .reconcile()
        .with_context(|| format!("Failed to scan {}", destination.display()))?;
    tracing::info!(
        "Reconciled {}: {} added, {} removed, {} refreshed",
        destination.display(),
        report.added,
        report.removed,
        report.refreshed
    );

    if cli.cleanup_empty {
        handle_cleanup(&mut store, &config, cli.yes, cli.dry_run)?;
    }

    if cli.reset_processed && !cli.dry_run {
        let removed = store.reset_processed();
        tracing::info!("Forgot {} processed item(s)", removed);
    }

    if cli.dry_run {
        handle_dry_run(&store, &config);
        return Ok(());
    }

    store.flush().context("Failed to write state")?;

    handle_crawl(config, store).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(tags) = cli.tags.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        config.site.tags = tags.to_string();
    }
    if let Some(dest) = &cli.dest {
        config.output.download_dir = dest.display().to_string();
    }
    if let Some(workers) = cli.workers {
        config.crawler.workers = workers;
    }
}

/// Handles --cleanup-empty: finds zero-byte media files and deletes them
fn handle_cleanup(
    store: &mut JsonStore,
    config: &Config,
    skip_prompt: bool,
    dry_run: bool,
) -> Result<()> {
    let root = config.destination_dir();
    let empty = find_zero_byte_files(&root, &config.site.media_extensions)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    if empty.is_empty() {
        tracing::info!("No zero-byte files under {}", root.display());
        return Ok(());
    }

    println!("Found {} zero-byte file(s):", empty.len());
    for path in &empty {
        println!("  - {}", path.display());
    }

    if dry_run {
        return Ok(());
    }

    let confirmed = skip_prompt
        || Confirm::new()
            .with_prompt(format!("Delete {} file(s)?", empty.len()))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

    if !confirmed {
        tracing::info!("Cleanup skipped");
        return Ok(());
    }

    let cleanup = store.remove_zero_byte_files(&empty);
    for (path, reason) in &cleanup.failed {
        tracing::warn!("Could not delete {}: {}", path.display(), reason);
    }
    tracing::info!("Deleted {} zero-byte file(s)", cleanup.removed.len());

    store.flush().context("Failed to write state")?;
    Ok(())
}

/// Handles --dry-run: shows what a crawl would start from
fn handle_dry_run(store: &JsonStore, config: &Config) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Site:");
    println!("  Base URL: {}", config.site.base_url);
    println!("  Tags: {}", config.site.tags);
    if let Some(host) = &config.site.canonical_media_host {
        println!("  Canonical media host: {}", host);
    }
    println!("  Media extensions: {}", config.site.media_extensions.join(", "));

    println!("\nCrawler:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Page size: {}", config.crawler.page_size);

    println!("\nState:");
    println!("  Destination: {}", store.destination().display());
    println!("  Processed items: {}", store.processed_count());
    println!("  Fetched assets: {}", store.fetched_count());

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, store: JsonStore) -> Result<()> {
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight downloads");
            signal_token.cancel();
        }
    });

    let report = run_crawl(&config, Box::new(store), &cancel)
        .await
        .context("Crawl failed")?;

    match &report.stop {
        StopReason::Exhausted => tracing::info!("Crawl completed successfully"),
        StopReason::Cancelled => tracing::warn!("Crawl interrupted; rerun to resume"),
        StopReason::Incomplete { .. } | StopReason::ListingFailed => {
            tracing::warn!("Crawl stopped early ({}); rerun to resume", report.stop)
        }
    }

    println!(
        "Pages: {}  Downloaded: {}  Present: {}  No asset: {}  Failed: {}",
        report.pages_completed,
        report.downloaded,
        report.already_present,
        report.no_asset,
        report.failed
    );
    if !report.unprocessed.is_empty() {
        let ids: Vec<String> = report.unprocessed.iter().map(ToString::to_string).collect();
        println!("Unprocessed: {}", ids.join(", "));
    }

    Ok(())
}
