//! Credentialed HTTP client for upstream document fetches
//!
//! One fetch per resolution, bounded by a hard timeout. The proxy never
//! retries an upstream call itself: a retry would double-spend the shared
//! rate-limit budget, so the decision belongs to the caller.

use crate::{Error, Result};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Configuration for the document fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Whole-request timeout, including body transfer
    pub timeout: Duration,
    /// Refuse plaintext upstream URLs
    pub require_https: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            require_https: true,
        }
    }
}

/// HTTP client for fetching documents from the credentialed upstream
pub struct DocumentFetcher {
    client: Client,
    config: FetcherConfig,
}

impl DocumentFetcher {
    /// Create a new fetcher with configuration
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .use_rustls_tls();

        if config.require_https {
            builder = builder.https_only(true);
        }

        let client = builder.build().map_err(Error::Network)?;
        Ok(Self { client, config })
    }

    /// Fetch a document once, returning the streaming response
    ///
    /// The credential travels only in the outbound header; it never appears
    /// in errors or logs.
    #[instrument(skip(self, api_key), fields(host = url.host_str().unwrap_or("?")))]
    pub async fn fetch(&self, url: &Url, api_key: &str) -> Result<reqwest::Response> {
        debug!("fetching document from upstream");

        let response = self
            .client
            .get(url.clone())
            .header("X-API-KEY", api_key)
            .header(reqwest::header::ACCEPT, "application/pdf")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("upstream fetch timed out");
                    Error::Timeout
                } else {
                    warn!("upstream fetch failed: {}", e);
                    Error::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("upstream returned HTTP {}", status);
            return Err(Error::UpstreamStatus(status.as_u16()));
        }

        debug!("upstream responded {}", status);
        Ok(response)
    }

    /// Get fetcher configuration
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plaintext_fetcher() -> DocumentFetcher {
        DocumentFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(5),
            require_https: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_credential_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/documents/doc-1/download")
            .match_header("x-api-key", "secret-key")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(b"%PDF-1.7 fixture".as_slice())
            .create_async()
            .await;

        let fetcher = plaintext_fetcher();
        let url = Url::parse(&format!("{}/documents/doc-1/download", server.url())).unwrap();
        let response = fetcher.fetch(&url, "secret-key").await.unwrap();
        let body = response.bytes().await.unwrap();
        assert_eq!(body.as_ref(), b"%PDF-1.7 fixture");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/documents/doc-2/download")
            .with_status(503)
            .create_async()
            .await;

        let fetcher = plaintext_fetcher();
        let url = Url::parse(&format!("{}/documents/doc-2/download", server.url())).unwrap();
        let err = fetcher.fetch(&url, "secret-key").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamStatus(503)));
        assert!(err.is_upstream_failure());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let fetcher = plaintext_fetcher();
        // Reserved port with nothing listening
        let url = Url::parse("http://127.0.0.1:1/documents/doc-3/download").unwrap();
        let err = fetcher.fetch(&url, "secret-key").await.unwrap_err();
        assert!(err.is_upstream_failure());
    }
}
