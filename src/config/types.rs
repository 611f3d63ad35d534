use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawl loop and worker pool behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Items per listing page; the page offset advances by this amount
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pause between two listing pages (milliseconds)
    #[serde(default = "default_inter_page_delay")]
    pub inter_page_delay_ms: u64,

    /// Pause a worker takes after each download (milliseconds)
    #[serde(default = "default_inter_download_delay")]
    pub inter_download_delay_ms: u64,

    /// Pause before each item page request (milliseconds)
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,

    /// Pause before each listing page request (milliseconds)
    #[serde(default = "default_listing_delay")]
    pub listing_delay_ms: u64,

    /// How long in-flight workers may keep running after cancellation (milliseconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Consecutive listing failures tolerated before the crawl stops
    #[serde(default = "default_max_listing_failures")]
    pub max_listing_failures: u32,
}

/// HTTP transport and retry behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for listing and item page requests (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Timeout for an asset request to return its headers (milliseconds)
    #[serde(default = "default_download_timeout")]
    pub download_timeout_ms: u64,

    /// First wait after an HTTP 429 (milliseconds)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Amount added to the wait for every further HTTP 429 (milliseconds)
    #[serde(default = "default_retry_step")]
    pub retry_step_ms: u64,

    /// Maximum number of retries after HTTP 429 for a single call
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Write buffer size used while streaming an asset to disk (bytes)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// The content site being harvested
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Site root, e.g. "https://booru.example"
    pub base_url: String,

    /// Space-separated tag query
    pub tags: String,

    /// Host that every alias in `media_host_aliases` collapses to
    #[serde(default)]
    pub canonical_media_host: Option<String>,

    /// Host patterns ("host" or "*.host") that serve the same media
    #[serde(default)]
    pub media_host_aliases: Vec<String>,

    /// Host patterns whose links are never valid assets
    #[serde(default)]
    pub denied_hosts: Vec<String>,

    /// Recognized media file extensions, without the leading dot
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

/// Where assets and state documents are written
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root download directory; assets land in a subdirectory named after the first tag
    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    /// Directory holding the state documents
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default = "default_processed_file")]
    pub processed_file: String,

    #[serde(default = "default_fetched_file")]
    pub fetched_file: String,

    /// Summary of the latest run, rewritten when a crawl stops
    #[serde(default = "default_results_file")]
    pub results_file: String,
}

impl CrawlerConfig {
    pub fn inter_page_delay(&self) -> Duration {
        Duration::from_millis(self.inter_page_delay_ms)
    }

    pub fn inter_download_delay(&self) -> Duration {
        Duration::from_millis(self.inter_download_delay_ms)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn listing_delay(&self) -> Duration {
        Duration::from_millis(self.listing_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

impl SiteConfig {
    /// Tags as individual terms, in the order given
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags.split_whitespace().collect()
    }
}

impl Config {
    /// Directory that assets for the configured tag query are written to
    ///
    /// Mirrors the layout `<download-dir>/<first tag>`; falls back to the
    /// download directory itself when the tag query is empty.
    pub fn destination_dir(&self) -> PathBuf {
        let root = PathBuf::from(&self.output.download_dir);
        match self.site.tag_list().first() {
            Some(first) => root.join(sanitize_dir_name(first)),
            None => root,
        }
    }

    pub fn processed_path(&self) -> PathBuf {
        PathBuf::from(&self.output.state_dir).join(&self.output.processed_file)
    }

    pub fn fetched_path(&self) -> PathBuf {
        PathBuf::from(&self.output.state_dir).join(&self.output.fetched_file)
    }

    pub fn results_path(&self) -> PathBuf {
        PathBuf::from(&self.output.state_dir).join(&self.output.results_file)
    }
}

fn sanitize_dir_name(tag: &str) -> String {
    tag.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            page_size: default_page_size(),
            inter_page_delay_ms: default_inter_page_delay(),
            inter_download_delay_ms: default_inter_download_delay(),
            item_delay_ms: default_item_delay(),
            listing_delay_ms: default_listing_delay(),
            shutdown_grace_ms: default_shutdown_grace(),
            max_listing_failures: default_max_listing_failures(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout(),
            download_timeout_ms: default_download_timeout(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_step_ms: default_retry_step(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            state_dir: default_state_dir(),
            processed_file: default_processed_file(),
            fetched_file: default_fetched_file(),
            results_file: default_results_file(),
        }
    }
}

fn default_workers() -> u32 {
    2
}

fn default_page_size() -> u32 {
    42
}

fn default_inter_page_delay() -> u64 {
    5_000
}

fn default_inter_download_delay() -> u64 {
    3_000
}

fn default_item_delay() -> u64 {
    1_000
}

fn default_listing_delay() -> u64 {
    500
}

fn default_shutdown_grace() -> u64 {
    10_000
}

fn default_max_listing_failures() -> u32 {
    3
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_download_timeout() -> u64 {
    60_000
}

fn default_retry_base_delay() -> u64 {
    3_000
}

fn default_retry_step() -> u64 {
    1_000
}

fn default_max_rate_limit_retries() -> u32 {
    100
}

fn default_chunk_size() -> usize {
    8192
}

fn default_media_extensions() -> Vec<String> {
    ["mp4", "webm", "avi", "mov", "mkv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_download_dir() -> String {
    "downloads".to_string()
}

fn default_state_dir() -> String {
    ".".to_string()
}

fn default_processed_file() -> String {
    "processed-items.json".to_string()
}

fn default_fetched_file() -> String {
    "fetched-assets.json".to_string()
}

fn default_results_file() -> String {
    "download-results.json".to_string()
}
