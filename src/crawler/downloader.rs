//! Asset download: filename derivation and streamed writes

use crate::crawler::fetcher::{get_with_retry, FetchError, RetriedResponse, RetryPolicy};
use crate::state::ItemId;
use crate::url::has_media_extension;
use futures::StreamExt;
use reqwest::Client;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Errors that can occur while downloading one asset
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty response body from {url}")]
    EmptyBody { url: String },

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Fetch(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

const HASH_PREFIX_LEN: usize = 32;

/// The filename an item's asset is stored under, before collision handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedName {
    /// File stem including the item id suffix
    pub stem: String,
    /// Lowercase extension including the dot
    pub ext: String,
}

impl DerivedName {
    pub fn filename(&self) -> String {
        format!("{}{}", self.stem, self.ext)
    }

    /// Name for collision attempt `n`; 0 is the plain name
    pub fn candidate(&self, n: u32) -> String {
        if n == 0 {
            self.filename()
        } else {
            format!("{}_duplicate-{}{}", self.stem, n, self.ext)
        }
    }
}

/// Derives the storage filename for an asset
///
/// # Naming Rules
///
/// 1. Take the last path segment of the URL
/// 2. Without a recognized media extension the name is `video_<id>.mp4`
/// 3. A stem shaped `<32 hex chars>_<rest>` keeps only the hash part
/// 4. Otherwise the whole stem is kept
/// 5. `_<id>` is appended to the stem
///
/// # Example
///
/// ```
/// use sumi_harvest::crawler::derive_filename;
/// use sumi_harvest::ItemId;
/// use url::Url;
///
/// let url = Url::parse("https://media.booru.example/images/9/clip.mp4?77").unwrap();
/// let exts = vec!["mp4".to_string()];
/// let name = derive_filename(&url, &ItemId::new("77"), &exts);
/// assert_eq!(name.filename(), "clip_77.mp4");
/// ```
pub fn derive_filename(url: &Url, item: &ItemId, extensions: &[String]) -> DerivedName {
    let id = item.file_safe();
    let basename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let Some((stem, ext)) = basename
        .rsplit_once('.')
        .filter(|_| has_media_extension(basename, extensions))
    else {
        return DerivedName {
            stem: format!("video_{}", id),
            ext: ".mp4".to_string(),
        };
    };

    let stem = sanitize_component(stem);
    let base = match stem.split_once('_') {
        Some((hash, _))
            if hash.len() == HASH_PREFIX_LEN && hash.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            hash.to_string()
        }
        _ => stem.clone(),
    };

    DerivedName {
        stem: format!("{}_{}", base, id),
        ext: format!(".{}", ext.to_lowercase()),
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Path of the in-progress file for `dest`
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Transfer settings for a single download
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// Bound on the wait for response headers
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub chunk_size: usize,
}

/// Streams an asset to `dest`, returning the number of bytes written
///
/// The body is written to `<dest>.part` and renamed into place once
/// complete, so `dest` never holds a partial file. Cancellation and errors
/// remove the partial file. An empty body is an error.
pub async fn stream_to_file(
    client: &Client,
    url: &Url,
    dest: &Path,
    settings: &TransferSettings,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let part = part_path(dest);
    let result = write_part(client, url, &part, settings, cancel).await;

    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&part, dest).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(DownloadError::io(dest, e));
    }

    Ok(bytes)
}

async fn write_part(
    client: &Client,
    url: &Url,
    part: &Path,
    settings: &TransferSettings,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let RetriedResponse { response, .. } =
        get_with_retry(client, url.as_str(), settings.timeout, &settings.retry, cancel).await?;

    if let Some(parent) = part.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let file = tokio::fs::File::create(part)
        .await
        .map_err(|e| DownloadError::io(part, e))?;
    let mut writer = tokio::io::BufWriter::with_capacity(settings.chunk_size, file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(part, e))?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| DownloadError::io(part, e))?;
    drop(writer);

    if written == 0 {
        return Err(DownloadError::EmptyBody {
            url: url.to_string(),
        });
    }

    Ok(written)
}
