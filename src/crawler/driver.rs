//! Crawl driver - the page-by-page orchestration loop
//!
//! This module walks the listing one page at a time:
//! - list the page
//! - drop items that are already processed
//! - hand the rest to the fetch scheduler and wait for the whole batch
//! - commit settled items and flush the store
//!
//! Every page boundary is a durable checkpoint. A page with any unsettled
//! item stops the crawl; the next run lists that page again and retries only
//! the items that are still unprocessed.

use crate::config::Config;
use crate::crawler::context::{lock_context, SharedContext};
use crate::crawler::fetcher::cancellable_sleep;
use crate::crawler::lister::PageLister;
use crate::crawler::scheduler::{BatchReport, FetchScheduler};
use crate::state::{CrawlPhase, FetchOutcome, ItemId};
use crate::HarvestError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a crawl ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The listing returned an empty page
    Exhausted,
    /// A page finished with unprocessed items
    Incomplete {
        page_offset: u32,
        remaining: Vec<ItemId>,
    },
    /// The cancellation token fired
    Cancelled,
    /// Too many consecutive listing pages failed
    ListingFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "listing exhausted"),
            Self::Incomplete {
                page_offset,
                remaining,
            } => {
                write!(
                    f,
                    "page at offset {} left {} item(s) unprocessed:",
                    page_offset,
                    remaining.len()
                )?;
                for (i, id) in remaining.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{}{}", sep, id)?;
                }
                Ok(())
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::ListingFailed => write!(f, "listing pages kept failing"),
        }
    }
}

/// Totals for one crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub pages_completed: u32,
    pub downloaded: usize,
    pub already_present: usize,
    pub no_asset: usize,
    pub failed: usize,
    /// Files written by this run, in completion order
    pub downloaded_files: Vec<String>,
    /// Items of the last page that are still unprocessed
    pub unprocessed: Vec<ItemId>,
    pub stop: StopReason,
}

impl Default for CrawlReport {
    fn default() -> Self {
        Self {
            pages_completed: 0,
            downloaded: 0,
            already_present: 0,
            no_asset: 0,
            failed: 0,
            downloaded_files: Vec::new(),
            unprocessed: Vec::new(),
            stop: StopReason::Exhausted,
        }
    }
}

impl CrawlReport {
    fn tally(&mut self, batch: &BatchReport) {
        for report in &batch.reports {
            match &report.outcome {
                FetchOutcome::Downloaded { filename, .. } => {
                    self.downloaded += 1;
                    self.downloaded_files.push(filename.clone());
                }
                FetchOutcome::AlreadyPresent { .. } => self.already_present += 1,
                FetchOutcome::NoAssetFound => self.no_asset += 1,
                FetchOutcome::Failed { .. } => self.failed += 1,
            }
        }
    }
}

/// Settings for the driver loop
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub tags: String,
    pub page_size: u32,
    pub inter_page_delay: Duration,
    pub max_listing_failures: u32,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tags: config.site.tags.trim().to_string(),
            page_size: config.crawler.page_size,
            inter_page_delay: config.crawler.inter_page_delay(),
            max_listing_failures: config.crawler.max_listing_failures,
        }
    }
}

pub struct CrawlDriver {
    lister: Arc<dyn PageLister>,
    scheduler: FetchScheduler,
    context: SharedContext,
    settings: DriverSettings,
    phase: CrawlPhase,
}

impl CrawlDriver {
    pub fn new(
        lister: Arc<dyn PageLister>,
        scheduler: FetchScheduler,
        context: SharedContext,
        settings: DriverSettings,
    ) -> Self {
        Self {
            lister,
            scheduler,
            context,
            settings,
            phase: CrawlPhase::Idle,
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    /// Moves to the next phase, refusing transitions the table does not allow
    fn transition(&mut self, next: CrawlPhase) -> Result<(), HarvestError> {
        if !self.phase.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!("Crawl phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Runs the crawl until the listing is exhausted, a page is left
    /// incomplete, listing keeps failing, or the token is cancelled
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<CrawlReport, HarvestError> {
        let mut report = CrawlReport::default();
        let mut offset: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        self.transition(CrawlPhase::ListingPage)?;

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            tracing::info!("Listing page at offset {}", offset);
            let listed = match self
                .lister
                .list_page(&self.settings.tags, offset, cancel)
                .await
            {
                Ok(ids) => {
                    consecutive_failures = 0;
                    Some(ids)
                }
                Err(e) if e.is_cancelled() => break StopReason::Cancelled,
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        "Listing page at offset {} failed ({}/{}): {}",
                        offset,
                        consecutive_failures,
                        self.settings.max_listing_failures,
                        e
                    );
                    if consecutive_failures >= self.settings.max_listing_failures {
                        break StopReason::ListingFailed;
                    }
                    None
                }
            };

            if let Some(ids) = listed {
                if ids.is_empty() {
                    self.transition(CrawlPhase::Draining)?;
                    tracing::info!("Listing exhausted at offset {}", offset);
                    break StopReason::Exhausted;
                }

                self.transition(CrawlPhase::FilteringNew)?;
                let listed_count = ids.len();
                let fresh = self.filter_new(ids);
                tracing::info!(
                    "Offset {}: {} listed, {} new",
                    offset,
                    listed_count,
                    fresh.len()
                );

                if !fresh.is_empty() {
                    self.transition(CrawlPhase::Dispatching)?;
                    let batch = self.scheduler.run(fresh.clone(), cancel).await;

                    self.transition(CrawlPhase::Committing)?;
                    report.tally(&batch);
                    let remaining = self.commit(&fresh, &batch).await;

                    if cancel.is_cancelled() {
                        report.unprocessed = remaining;
                        break StopReason::Cancelled;
                    }
                    if !remaining.is_empty() {
                        report.unprocessed = remaining.clone();
                        break StopReason::Incomplete {
                            page_offset: offset,
                            remaining,
                        };
                    }
                }

                report.pages_completed += 1;
            }

            self.transition(CrawlPhase::NextPage)?;
            offset += self.settings.page_size;
            if !cancellable_sleep(self.settings.inter_page_delay, cancel).await {
                break StopReason::Cancelled;
            }
            self.transition(CrawlPhase::ListingPage)?;
        };

        self.transition(CrawlPhase::Stopped)?;
        self.flush().await;

        report.stop = stop;
        tracing::info!(
            "Crawl stopped ({}): {} page(s), {} downloaded, {} already present, {} without asset, {} failed",
            report.stop,
            report.pages_completed,
            report.downloaded,
            report.already_present,
            report.no_asset,
            report.failed
        );
        Ok(report)
    }

    fn filter_new(&self, ids: Vec<ItemId>) -> Vec<ItemId> {
        let context = lock_context(&self.context);
        ids.into_iter()
            .filter(|id| !context.store().is_processed(id))
            .collect()
    }

    /// Marks settled items processed, flushes, and returns the ids of
    /// `batch_items` that are still unprocessed
    async fn commit(&self, batch_items: &[ItemId], batch: &BatchReport) -> Vec<ItemId> {
        let remaining: Vec<ItemId> = {
            let mut context = lock_context(&self.context);
            for item_report in &batch.reports {
                if item_report.outcome.is_settled() {
                    context.store_mut().mark_processed(item_report.item.clone());
                }
            }
            batch_items
                .iter()
                .filter(|id| !context.store().is_processed(id))
                .cloned()
                .collect()
        };

        for id in &remaining {
            let failure = batch.reports.iter().find_map(|r| match &r.outcome {
                FetchOutcome::Failed { reason } if r.item == *id => Some(reason.as_str()),
                _ => None,
            });
            match failure {
                Some(reason) => tracing::warn!("Item {} left unprocessed: {}", id, reason),
                None => tracing::warn!("Item {} left unprocessed: no outcome", id),
            }
        }

        self.flush().await;
        remaining
    }

    /// Writes the store off the async workers
    ///
    /// A failure is logged and retried at the next checkpoint.
    async fn flush(&self) {
        let context = Arc::clone(&self.context);
        let written =
            tokio::task::spawn_blocking(move || lock_context(&context).store().flush()).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Failed to write state: {}", e),
            Err(e) => tracing::error!("State writer task failed: {}", e),
        }
    }
}
