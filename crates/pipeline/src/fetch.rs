use std::time::Duration;

use archiver_core::util::UrlExt;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Errors never include the query string of the log URL, which holds its access token.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
}

#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Download the whole log body. Any non-2xx response is an error.
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}

pub struct HttpLogFetcher {
    client: reqwest::Client,
}

impl HttpLogFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LogFetcher for HttpLogFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        let request_error =
            |e: reqwest::Error| FetchError::Request { url: url.redacted(), source: e.without_url() };
        let response = self.client.get(url.clone()).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.redacted(), status });
        }
        let body = response.bytes().await.map_err(request_error)?;
        tracing::debug!("Fetched {} bytes from {}", body.len(), url.redacted());
        Ok(body)
    }
}
