//! Crawler module for listing, resolving, and downloading
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with rate-limit retries and cancellation
//! - HTML parsing of listing and item pages
//! - Asset selection and filename derivation
//! - The worker pool that downloads each asset at most once
//! - The page-by-page driver that checkpoints progress

mod context;
mod downloader;
mod driver;
mod fetcher;
mod lister;
mod parser;
mod resolver;
mod scheduler;
#[cfg(test)]
mod test_support;

pub use context::{lock_context, Claim, ClaimGuard, FilePlan, RunContext, SharedContext};
pub use downloader::{derive_filename, part_path, stream_to_file, DerivedName, DownloadError, TransferSettings};
pub use driver::{CrawlDriver, CrawlReport, DriverSettings, StopReason};
pub use fetcher::{build_http_client, cancellable_sleep, fetch_text, get_with_retry, FetchError, RetryPolicy};
pub use lister::{HttpPageLister, PageLister};
pub use parser::{extract_asset_candidates, extract_item_ids, AssetCandidates};
pub use resolver::{select_asset, HttpItemResolver, ItemResolver};
pub use scheduler::{BatchReport, FetchScheduler, SchedulerSettings};

use crate::config::Config;
use crate::storage::{write_run_results, StateStore};
use crate::HarvestError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Runs a complete harvest for the configured tag query
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Build the HTTP client
/// 2. Wire the listing, resolution, and download stages around `store`
/// 3. Walk the listing until it is exhausted, a page stays incomplete,
///    or `cancel` fires
///
/// The store is flushed at every page boundary and once more at the end,
/// after which a summary of the run is written next to the state documents.
pub async fn run_crawl(
    config: &Config,
    store: Box<dyn StateStore>,
    cancel: &CancellationToken,
) -> Result<CrawlReport, HarvestError> {
    let client = build_http_client(&config.http).map_err(|source| FetchError::Network {
        url: config.site.base_url.clone(),
        source,
    })?;
    let base = Url::parse(&config.site.base_url).map_err(FetchError::from)?;

    tracing::info!(
        "Harvesting '{}' from {} into {}",
        config.site.tags,
        base,
        store.destination().display()
    );

    let context = RunContext::shared(store);
    let lister = Arc::new(HttpPageLister::new(client.clone(), base.clone(), config));
    let resolver = Arc::new(HttpItemResolver::new(client.clone(), base, config));
    let scheduler = FetchScheduler::new(
        client,
        resolver,
        context.clone(),
        SchedulerSettings::from_config(config),
    );

    let mut driver = CrawlDriver::new(lister, scheduler, context, DriverSettings::from_config(config));
    let report = driver.run(cancel).await?;

    save_results(config.results_path(), config.site.tags.trim().to_string(), &report).await;
    Ok(report)
}

/// Writes the run summary; a failure is logged and does not fail the crawl
async fn save_results(path: PathBuf, tags: String, report: &CrawlReport) {
    let total_items = report.downloaded + report.already_present + report.no_asset + report.failed;
    let files = report.downloaded_files.clone();
    let stop = report.stop.to_string();
    let target = path.clone();

    let written = tokio::task::spawn_blocking(move || {
        write_run_results(&target, &tags, total_items, &files, &stop)
    })
    .await;

    match written {
        Ok(Ok(())) => tracing::info!("Run summary written to {}", path.display()),
        Ok(Err(e)) => tracing::warn!("Failed to write run summary: {}", e),
        Err(e) => tracing::warn!("Run summary task failed: {}", e),
    }
}
