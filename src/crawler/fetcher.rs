//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building the shared HTTP client
//! - The rate-limit retry loop with linear backoff
//! - Cancellable requests and pacing sleeps
//! - Error classification

use crate::config::HttpConfig;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors produced by a single logical request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Still rate limited on {url} after {attempts} retries")]
    RateLimitExhausted { url: String, attempts: u32 },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Linear backoff applied after HTTP 429
///
/// The wait before retry `n` (0-based) is `base + step * n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub step: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_delay_ms),
            step: Duration::from_millis(config.retry_step_ms),
            max_retries: config.max_rate_limit_retries,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base + self.step * attempt
    }
}

/// A successful response and the number of 429 retries it took
#[derive(Debug)]
pub struct RetriedResponse {
    pub response: Response,
    pub retries: u32,
}

/// Builds the HTTP client shared by listing, item, and asset requests
///
/// # Example
///
/// ```no_run
/// use sumi_harvest::config::HttpConfig;
/// use sumi_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Sleeps for `duration` unless cancelled first
///
/// Returns false if the token fired before the sleep finished.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Sends a GET request, retrying while the server answers 429
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | HTTP 2xx | Return the response |
/// | HTTP 429 | Wait `policy.delay(n)`, retry up to `policy.max_retries` times |
/// | Other HTTP status | `FetchError::Status` |
/// | Connect/transport error | `FetchError::Network` |
/// | No headers within `timeout` | `FetchError::Timeout` |
/// | Token cancelled | `FetchError::Cancelled` |
///
/// `timeout` bounds the wait for response headers only; reading the body is
/// up to the caller.
pub async fn get_with_retry(
    client: &Client,
    url: &str,
    timeout: Duration,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<RetriedResponse, FetchError> {
    let mut retries = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let send = tokio::time::timeout(timeout, client.get(url).send());
        let response = tokio::select! {
            result = send => match result {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => {
                    return Err(FetchError::Network { url: url.to_string(), source });
                }
                Err(_) => return Err(FetchError::Timeout { url: url.to_string() }),
            },
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            if retries >= policy.max_retries {
                return Err(FetchError::RateLimitExhausted {
                    url: url.to_string(),
                    attempts: retries,
                });
            }

            let wait = policy.delay(retries);
            tracing::warn!(
                "Rate limited on {}, retrying in {:.1}s (retry {}/{})",
                url,
                wait.as_secs_f64(),
                retries + 1,
                policy.max_retries
            );

            if !cancellable_sleep(wait, cancel).await {
                return Err(FetchError::Cancelled);
            }
            retries += 1;
            continue;
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        return Ok(RetriedResponse { response, retries });
    }
}

/// Fetches a page and returns its body as text
pub async fn fetch_text(
    client: &Client,
    url: &str,
    timeout: Duration,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, FetchError> {
    let RetriedResponse { response, .. } =
        get_with_retry(client, url, timeout, policy, cancel).await?;

    let text = tokio::select! {
        result = tokio::time::timeout(timeout, response.text()) => match result {
            Ok(Ok(text)) => text,
            Ok(Err(source)) => return Err(FetchError::Body { url: url.to_string(), source }),
            Err(_) => return Err(FetchError::Timeout { url: url.to_string() }),
        },
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
    };

    tracing::debug!("Fetched {} ({} chars)", url, text.len());
    Ok(text)
}
