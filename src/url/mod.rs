//! URL handling module for Sumi-Harvest
//!
//! This module provides the asset identity rules: link resolution, canonical
//! forms with host-alias collapsing, host pattern matching, and the asset
//! validity predicate.

mod matcher;
mod normalize;

use crate::config::SiteConfig;
use crate::UrlError;
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

pub use matcher::{matches_any, matches_wildcard};
pub use normalize::{canonical_form, resolve_href};

/// A downloadable media URL together with its canonical form
///
/// Equality and hashing only look at the canonical form, so two links that
/// differ by alias host or fragment compare equal.
#[derive(Debug, Clone)]
pub struct AssetRef {
    url: Url,
    canonical: String,
}

impl AssetRef {
    /// The URL as discovered, used for the actual download
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The normalized form used for deduplication
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for AssetRef {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for AssetRef {}

impl Hash for AssetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Rules deciding which URLs are assets and when two assets are the same
#[derive(Debug, Clone, Default)]
pub struct AssetPolicy {
    canonical_host: Option<String>,
    aliases: Vec<String>,
    denied_hosts: Vec<String>,
    extensions: Vec<String>,
}

impl AssetPolicy {
    pub fn new(
        canonical_host: Option<String>,
        aliases: Vec<String>,
        denied_hosts: Vec<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            canonical_host: canonical_host.map(|h| h.to_lowercase()),
            aliases: aliases.into_iter().map(|a| a.to_lowercase()).collect(),
            denied_hosts: denied_hosts.into_iter().map(|d| d.to_lowercase()).collect(),
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    pub fn from_site(site: &SiteConfig) -> Self {
        Self::new(
            site.canonical_media_host.clone(),
            site.media_host_aliases.clone(),
            site.denied_hosts.clone(),
            site.media_extensions.clone(),
        )
    }

    /// The asset validity predicate
    ///
    /// A URL is a usable asset when it is HTTP(S), its host is not denied, and
    /// its path ends in a recognized media extension.
    pub fn is_valid_asset_url(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        let Some(host) = url.host_str() else {
            return false;
        };

        if matches_any(&self.denied_hosts, &host.to_lowercase()) {
            return false;
        }

        let last_segment = url.path().rsplit('/').next().unwrap_or_default();
        has_media_extension(last_segment, &self.extensions)
    }

    /// Builds the asset reference for a URL
    pub fn asset_ref(&self, url: Url) -> Result<AssetRef, UrlError> {
        let canonical = canonical_form(&url, self.canonical_host.as_deref(), &self.aliases)?;
        Ok(AssetRef { url, canonical })
    }
}

/// Returns true if a file name ends in one of the (lowercase) extensions
pub fn has_media_extension(name: &str, extensions: &[String]) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_lowercase();
            extensions.iter().any(|known| *known == ext)
        }
        _ => false,
    }
}
