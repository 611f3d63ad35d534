//! Listing page access

use crate::config::Config;
use crate::crawler::fetcher::{cancellable_sleep, fetch_text, FetchError, RetryPolicy};
use crate::crawler::parser::extract_item_ids;
use crate::state::ItemId;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Source of item identifiers, one listing page at a time
#[async_trait]
pub trait PageLister: Send + Sync {
    /// Returns the item ids on the page starting at `offset`
    ///
    /// The ids are ordered and duplicate-free. An empty result marks the end
    /// of the listing.
    async fn list_page(
        &self,
        tags: &str,
        offset: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ItemId>, FetchError>;
}

/// Lists pages of a booru-style site over HTTP
#[derive(Debug, Clone)]
pub struct HttpPageLister {
    client: Client,
    base: Url,
    timeout: Duration,
    retry: RetryPolicy,
    delay: Duration,
}

impl HttpPageLister {
    pub fn new(client: Client, base: Url, config: &Config) -> Self {
        Self {
            client,
            base,
            timeout: config.http.request_timeout(),
            retry: RetryPolicy::from_config(&config.http),
            delay: config.crawler.listing_delay(),
        }
    }

    /// `{base}/index.php?page=post&s=list&tags=<tags>&pid=<offset>`
    pub fn page_url(&self, tags: &str, offset: u32) -> Result<Url, url::ParseError> {
        let mut url = self.base.join("index.php")?;
        url.query_pairs_mut()
            .append_pair("page", "post")
            .append_pair("s", "list")
            .append_pair("tags", tags)
            .append_pair("pid", &offset.to_string());
        Ok(url)
    }
}

#[async_trait]
impl PageLister for HttpPageLister {
    async fn list_page(
        &self,
        tags: &str,
        offset: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ItemId>, FetchError> {
        let url = self.page_url(tags, offset)?;

        if !cancellable_sleep(self.delay, cancel).await {
            return Err(FetchError::Cancelled);
        }

        tracing::debug!("Listing page at offset {}: {}", offset, url);
        let body = fetch_text(&self.client, url.as_str(), self.timeout, &self.retry, cancel).await?;
        let ids = extract_item_ids(&body);
        tracing::debug!("Offset {} listed {} items", offset, ids.len());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::fetcher::build_http_client;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lister_for(server: &MockServer) -> HttpPageLister {
        let config = parse_config(&format!(
            "[crawler]\nlisting-delay-ms = 0\n[site]\nbase-url = \"{}\"\ntags = \"alpha\"\n",
            server.uri()
        ))
        .unwrap();
        let client = build_http_client(&config.http).unwrap();
        HttpPageLister::new(client, Url::parse(&server.uri()).unwrap(), &config)
    }

    #[tokio::test]
    async fn test_page_url_layout() {
        let server = MockServer::start().await;
        let lister = lister_for(&server);
        let url = lister.page_url("alpha video", 84).unwrap();
        assert_eq!(url.path(), "/index.php");
        assert_eq!(
            url.query(),
            Some("page=post&s=list&tags=alpha+video&pid=84")
        );
    }

    #[tokio::test]
    async fn test_list_page_parses_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.php"))
            .and(query_param("s", "list"))
            .and(query_param("pid", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="index.php?page=post&amp;s=view&amp;id=5">5</a>
                   <a href="index.php?page=post&amp;s=view&amp;id=6">6</a>"#,
            ))
            .mount(&server)
            .await;

        let lister = lister_for(&server);
        let ids = lister
            .list_page("alpha", 42, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids, vec![ItemId::new("5"), ItemId::new("6")]);
    }

    #[tokio::test]
    async fn test_list_page_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let lister = lister_for(&server);
        let err = lister
            .list_page("alpha", 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
