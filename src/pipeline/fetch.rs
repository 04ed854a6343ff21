//! Resource fetching: download one page image by URL.
//!
//! The chapter runner only sees the [`ResourceFetcher`] trait, so tests can
//! serve images from memory. [`HttpFetcher`] is the production client: one
//! shared `reqwest::Client` with a per-request timeout, and the chapter URL
//! sent as `Referer` because several CDNs refuse hot-linked requests.

use crate::error::{JobError, ResourceError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use std::time::Duration;
use tracing::debug;

/// Browser-like UA; some image hosts 403 the default reqwest agent.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Downloads raw image bytes.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch `url`. `referer` is the chapter page the locator came from.
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, ResourceError>;
}

/// HTTP implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    /// Build a fetcher whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, JobError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| JobError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, ResourceError> {
        let mut request = self.client.get(url);
        if let Some(value) = referer.and_then(|r| HeaderValue::from_str(r).ok()) {
            request = request.header(REFERER, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResourceError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, self.timeout_secs, e))?;

        debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

fn map_reqwest_error(url: &str, secs: u64, e: reqwest::Error) -> ResourceError {
    if e.is_timeout() {
        ResourceError::Timeout {
            url: url.to_string(),
            secs,
        }
    } else {
        ResourceError::Fetch {
            url: url.to_string(),
            detail: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetcher_builds_with_timeout() {
        let f = HttpFetcher::new(5).unwrap();
        assert_eq!(f.timeout_secs, 5);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_fetch_error() {
        let f = HttpFetcher::new(2).unwrap();
        // Port 9 on localhost is the discard service; nothing listens in CI.
        let err = f.fetch("http://127.0.0.1:9/page.jpg", None).await.unwrap_err();
        assert!(
            matches!(err, ResourceError::Fetch { .. } | ResourceError::Timeout { .. }),
            "got: {err:?}"
        );
    }
}
