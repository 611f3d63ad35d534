//! Fetch scheduler for one batch of items
//!
//! This module handles:
//! - A fixed pool of worker tasks pulling items from a shared queue
//! - Resolution, claiming, and download of each item's asset
//! - At-most-once guarantees through the run context
//! - Pacing between downloads of the same worker
//! - Bounded shutdown after cancellation

use crate::config::Config;
use crate::crawler::context::{lock_context, Claim, ClaimGuard, FilePlan, SharedContext};
use crate::crawler::downloader::{stream_to_file, TransferSettings};
use crate::crawler::fetcher::{cancellable_sleep, RetryPolicy};
use crate::crawler::resolver::ItemResolver;
use crate::state::{FetchOutcome, ItemId, ItemReport};
use crate::storage::{record_for_file, FetchedAssetRecord};
use reqwest::Client;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How often a worker re-checks an asset held by another worker
const IN_FLIGHT_POLL: Duration = Duration::from_millis(50);

/// Settings the workers need, extracted from the configuration
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub transfer: TransferSettings,
    pub inter_download_delay: Duration,
    pub shutdown_grace: Duration,
    pub extensions: Vec<String>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.crawler.workers as usize,
            transfer: TransferSettings {
                timeout: config.http.download_timeout(),
                retry: RetryPolicy::from_config(&config.http),
                chunk_size: config.http.chunk_size,
            },
            inter_download_delay: config.crawler.inter_download_delay(),
            shutdown_grace: config.crawler.shutdown_grace(),
            extensions: config
                .site
                .media_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
        }
    }
}

/// Outcomes of one batch
///
/// Items whose processing was aborted by cancellation have no entry.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<ItemReport>,
}

impl BatchReport {
    pub fn outcome(&self, item: &ItemId) -> Option<&FetchOutcome> {
        self.reports
            .iter()
            .find(|report| &report.item == item)
            .map(|report| &report.outcome)
    }

    pub fn count(&self, label: &str) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.label() == label)
            .count()
    }
}

struct Inner {
    client: Client,
    resolver: Arc<dyn ItemResolver>,
    context: SharedContext,
    settings: SchedulerSettings,
}

/// Runs resolution and download for a batch of items across a worker pool
#[derive(Clone)]
pub struct FetchScheduler {
    inner: Arc<Inner>,
}

impl FetchScheduler {
    pub fn new(
        client: Client,
        resolver: Arc<dyn ItemResolver>,
        context: SharedContext,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                resolver,
                context,
                settings,
            }),
        }
    }

    /// Processes `items` and returns once every worker has settled
    ///
    /// After cancellation, workers get `shutdown_grace` to finish what they
    /// are doing; any still running after that are aborted.
    pub async fn run(&self, items: Vec<ItemId>, cancel: &CancellationToken) -> BatchReport {
        if items.is_empty() {
            return BatchReport::default();
        }

        let worker_count = self.inner.settings.workers.clamp(1, items.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let inner = Arc::clone(&self.inner);
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { worker(worker_id, inner, queue, tx, cancel).await });
        }
        drop(tx);

        let far_future = tokio::time::Instant::now() + Duration::from_secs(86_400 * 365);
        let mut deadline = far_future;
        let mut cancelling = false;
        let mut aborted = false;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => tracing::error!("Fetch worker panicked: {}", e),
                    Some(_) => {}
                },
                _ = cancel.cancelled(), if !cancelling => {
                    cancelling = true;
                    deadline = tokio::time::Instant::now() + self.inner.settings.shutdown_grace;
                    tracing::info!(
                        "Cancellation requested, waiting up to {:.1}s for {} worker(s)",
                        self.inner.settings.shutdown_grace.as_secs_f64(),
                        workers.len()
                    );
                },
                _ = tokio::time::sleep_until(deadline), if cancelling && !aborted => {
                    aborted = true;
                    tracing::warn!("Grace period over, aborting {} worker(s)", workers.len());
                    workers.abort_all();
                },
            }
        }

        let mut report = BatchReport::default();
        while let Some(item_report) = rx.recv().await {
            report.reports.push(item_report);
        }
        report
    }
}

async fn worker(
    worker_id: usize,
    inner: Arc<Inner>,
    queue: Arc<Mutex<VecDeque<ItemId>>>,
    tx: mpsc::UnboundedSender<ItemReport>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        let Some(item) = next else {
            break;
        };

        let Some(outcome) = process_item(&inner, &item, &cancel).await else {
            tracing::debug!("[worker {}] item {} left unsettled", worker_id, item);
            continue;
        };

        match &outcome {
            FetchOutcome::Failed { reason } => {
                tracing::warn!("Item {} failed: {}", item, reason)
            }
            other => tracing::info!("Item {}: {}", item, other),
        }

        let downloaded = matches!(outcome, FetchOutcome::Downloaded { .. });
        if tx.send(ItemReport { item, outcome }).is_err() {
            break;
        }

        if downloaded {
            cancellable_sleep(inner.settings.inter_download_delay, &cancel).await;
        }
    }
}

/// Runs one item to an outcome
///
/// Returns None for items that were already processed or were cut short by
/// cancellation.
async fn process_item(
    inner: &Inner,
    item: &ItemId,
    cancel: &CancellationToken,
) -> Option<FetchOutcome> {
    if lock_context(&inner.context).store().is_processed(item) {
        tracing::debug!("Item {} already processed", item);
        return None;
    }

    let asset = match inner.resolver.resolve(item, cancel).await {
        Ok(Some(asset)) => asset,
        Ok(None) => return Some(FetchOutcome::NoAssetFound),
        Err(e) if e.is_cancelled() => return None,
        Err(e) => {
            return Some(FetchOutcome::Failed {
                reason: e.to_string(),
            })
        }
    };

    loop {
        let claim = lock_context(&inner.context).claim(&asset);
        match claim {
            Claim::Claimed => break,
            Claim::Completed(filename) => return Some(FetchOutcome::AlreadyPresent { filename }),
            Claim::InFlight => {
                if !cancellable_sleep(IN_FLIGHT_POLL, cancel).await {
                    return None;
                }
            }
        }
    }

    let guard = ClaimGuard::new(inner.context.clone(), asset);
    let (guard, plan) = match plan_file(inner, item, guard).await {
        Ok(planned) => planned,
        Err(reason) => return Some(FetchOutcome::Failed { reason }),
    };

    match plan {
        FilePlan::Present(filename) => {
            guard.finish_present(&filename);
            Some(FetchOutcome::AlreadyPresent { filename })
        }
        FilePlan::Download { filename, path } => {
            download(inner, item, guard, filename, &path, cancel).await
        }
    }
}

/// Plans the destination file off the async workers
///
/// The guard travels with the blocking task, so an aborted worker still
/// releases the claim and any reserved name once the task finishes.
async fn plan_file(
    inner: &Inner,
    item: &ItemId,
    mut guard: ClaimGuard,
) -> Result<(ClaimGuard, FilePlan), String> {
    let item = item.clone();
    let extensions = inner.settings.extensions.clone();

    let planned = tokio::task::spawn_blocking(move || {
        let plan = guard.plan(&item, &extensions);
        (guard, plan)
    })
    .await;

    match planned {
        Ok((guard, Ok(plan))) => Ok((guard, plan)),
        Ok((guard, Err(e))) => Err(format!(
            "Could not inspect destination for {}: {}",
            guard.asset(),
            e
        )),
        Err(e) => Err(format!("Planning task failed: {}", e)),
    }
}

async fn download(
    inner: &Inner,
    item: &ItemId,
    guard: ClaimGuard,
    filename: String,
    path: &Path,
    cancel: &CancellationToken,
) -> Option<FetchOutcome> {
    tracing::debug!("Downloading {} -> {}", guard.asset(), path.display());

    let result = stream_to_file(
        &inner.client,
        guard.asset().url(),
        path,
        &inner.settings.transfer,
        cancel,
    )
    .await;

    // An unsettled guard releases the claim and the reserved name on drop
    match result {
        Ok(bytes) => {
            let root = guard.destination();
            let record = record_after_download(&root, path, &filename, item, bytes);
            guard.finish_download(record);
            Some(FetchOutcome::Downloaded { filename, bytes })
        }
        Err(e) if e.is_cancelled() => None,
        Err(e) => Some(FetchOutcome::Failed {
            reason: e.to_string(),
        }),
    }
}

fn record_after_download(
    root: &Path,
    path: &Path,
    filename: &str,
    item: &ItemId,
    bytes: u64,
) -> FetchedAssetRecord {
    match record_for_file(root, path, Some(item.clone())) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!("Could not stat {}: {}", path.display(), e);
            FetchedAssetRecord {
                filename: filename.to_string(),
                filepath: path.display().to_string(),
                directory: ".".to_string(),
                size: bytes,
                modified_time: chrono::Utc::now().to_rfc3339(),
                extension: path
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
                    .unwrap_or_default(),
                item_id: Some(item.clone()),
            }
        }
    }
}
