//! Item-to-asset resolution

use crate::config::Config;
use crate::crawler::fetcher::{cancellable_sleep, fetch_text, FetchError, RetryPolicy};
use crate::crawler::parser::{extract_asset_candidates, AssetCandidates};
use crate::state::ItemId;
use crate::url::{resolve_href, AssetPolicy, AssetRef};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Maps an item to at most one downloadable asset
#[async_trait]
pub trait ItemResolver: Send + Sync {
    /// Returns `Ok(None)` when the item page has no usable asset
    async fn resolve(
        &self,
        item: &ItemId,
        cancel: &CancellationToken,
    ) -> Result<Option<AssetRef>, FetchError>;
}

/// Resolves items by fetching their post page
#[derive(Debug, Clone)]
pub struct HttpItemResolver {
    client: Client,
    base: Url,
    timeout: Duration,
    retry: RetryPolicy,
    delay: Duration,
    policy: AssetPolicy,
}

impl HttpItemResolver {
    pub fn new(client: Client, base: Url, config: &Config) -> Self {
        Self {
            client,
            base,
            timeout: config.http.request_timeout(),
            retry: RetryPolicy::from_config(&config.http),
            delay: config.crawler.item_delay(),
            policy: AssetPolicy::from_site(&config.site),
        }
    }

    /// `{base}/index.php?page=post&s=view&id=<id>`
    pub fn item_url(&self, item: &ItemId) -> Result<Url, url::ParseError> {
        let mut url = self.base.join("index.php")?;
        url.query_pairs_mut()
            .append_pair("page", "post")
            .append_pair("s", "view")
            .append_pair("id", item.as_str());
        Ok(url)
    }
}

#[async_trait]
impl ItemResolver for HttpItemResolver {
    async fn resolve(
        &self,
        item: &ItemId,
        cancel: &CancellationToken,
    ) -> Result<Option<AssetRef>, FetchError> {
        let url = self.item_url(item)?;

        if !cancellable_sleep(self.delay, cancel).await {
            return Err(FetchError::Cancelled);
        }

        let body = fetch_text(&self.client, url.as_str(), self.timeout, &self.retry, cancel).await?;
        let candidates = extract_asset_candidates(&body);
        let selected = select_asset(&candidates, &url, &self.policy);

        match &selected {
            Some(asset) => tracing::debug!("Item {} resolved to {}", item, asset),
            None => tracing::debug!("Item {} has no usable asset", item),
        }

        Ok(selected)
    }
}

/// Picks the asset for an item from its page's candidates
///
/// # Selection Rules
///
/// 1. Only if no "Original image" link survives filtering are the page's
///    other media links considered
/// 2. Links are resolved against `page_url` (protocol- and root-relative forms)
/// 3. Links failing the asset validity predicate are dropped
/// 4. Canonically equal links collapse into one
/// 5. The first link discovered wins; other distinct links are discarded
pub fn select_asset(
    candidates: &AssetCandidates,
    page_url: &Url,
    policy: &AssetPolicy,
) -> Option<AssetRef> {
    for (rule, links) in [
        ("original image", &candidates.original),
        ("media link", &candidates.media_links),
    ] {
        let mut distinct: Vec<AssetRef> = Vec::new();

        for raw in links {
            let Some(url) = resolve_href(raw, page_url) else {
                continue;
            };
            if !policy.is_valid_asset_url(&url) {
                continue;
            }
            match policy.asset_ref(url) {
                Ok(asset) => {
                    if !distinct.contains(&asset) {
                        distinct.push(asset);
                    }
                }
                Err(e) => tracing::debug!("Skipping candidate {}: {}", raw, e),
            }
        }

        if distinct.len() > 1 {
            tracing::debug!(
                "Found {} distinct {} candidates; keeping {}",
                distinct.len(),
                rule,
                distinct[0]
            );
        }

        if let Some(first) = distinct.into_iter().next() {
            return Some(first);
        }
    }

    None
}
