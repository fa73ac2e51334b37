pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::time::{sleep, Duration};
use url::Url;

/// One SSE data payload per item.
pub type LineStream = BoxStream<'static, Result<String, TransportError>>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("endpoint {0} cannot carry a path")]
    Endpoint(Url),

    #[error("connect failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("http status error: {0}")]
    Status(reqwest::StatusCode),

    #[error("stream read failed: {0}")]
    Read(#[source] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct TransportContext {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            user_agent: "streamwatch/0.1".to_string(),
            connect_timeout_secs: 30,
            retries: 2,
            retry_backoff_ms: 400,
        }
    }
}

impl TransportContext {
    pub async fn sleep_backoff(&self, attempt: u32) {
        let base = self.retry_backoff_ms.max(1);
        let shift = attempt.min(16);
        let ms = base.saturating_mul(1u64 << shift).min(30_000);
        sleep(Duration::from_millis(ms)).await;
    }
}

/// Subscription target: `{endpoint}/download/{mode}?url=...&quality=...`.
/// Query values are percent-encoded by the `url` crate.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub mode: String,
    pub quality: String,
    pub source_url: String,
    url: Url,
}

impl StreamRequest {
    pub fn new(
        endpoint: &Url,
        mode: &str,
        quality: &str,
        source_url: &str,
    ) -> Result<Self, TransportError> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Endpoint(endpoint.clone()))?
            .pop_if_empty()
            .push("download")
            .push(mode);
        url.query_pairs_mut()
            .append_pair("url", source_url)
            .append_pair("quality", quality);
        Ok(Self {
            mode: mode.to_string(),
            quality: quality.to_string(),
            source_url: source_url.to_string(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open one subscription. Implementations handle connect-level retries
    /// internally; a returned stream that ends or errors is the caller's
    /// problem (the monitor decides whether to reopen).
    async fn open(
        &self,
        request: &StreamRequest,
        ctx: &TransportContext,
    ) -> Result<LineStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_encodes_query() {
        let endpoint = Url::parse("http://127.0.0.1:8001").unwrap();
        let req = StreamRequest::new(&endpoint, "video", "best", "https://example.com/x").unwrap();
        assert_eq!(
            req.url().as_str(),
            "http://127.0.0.1:8001/download/video?url=https%3A%2F%2Fexample.com%2Fx&quality=best"
        );
    }

    #[test]
    fn request_url_keeps_endpoint_prefix() {
        let endpoint = Url::parse("https://dl.example.net/app1/").unwrap();
        let req = StreamRequest::new(&endpoint, "mp3", "192k", "https://a.b/c").unwrap();
        assert!(req.url().path().starts_with("/app1/download/mp3"));
    }

    #[test]
    fn opaque_endpoint_rejected() {
        let endpoint = Url::parse("mailto:x@example.com").unwrap();
        let err = StreamRequest::new(&endpoint, "mp3", "best", "https://a.b/c").unwrap_err();
        assert!(matches!(err, TransportError::Endpoint(_)));
    }
}
