//! HTTP transport abstraction.
//!
//! The coordinator never talks to a global client. It is handed an
//! `Arc<dyn Transport>`, which is [`ReqwestTransport`] in production and an
//! in-memory fake in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE,
};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::TransportError;
use super::range::ByteRange;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A request issued by the probe or a segment fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// `HEAD` for probes, `GET` for segment fetches.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Byte range to request; `None` fetches the whole resource.
    pub range: Option<ByteRange>,
}

impl TransportRequest {
    /// Creates a metadata-only request.
    #[must_use]
    pub fn head(url: Url) -> Self {
        Self {
            method: Method::HEAD,
            url,
            range: None,
        }
    }

    /// Creates a body request, optionally restricted to `range`.
    ///
    /// An empty range is dropped since it has no `Range` header form.
    #[must_use]
    pub fn get(url: Url, range: Option<ByteRange>) -> Self {
        Self {
            method: Method::GET,
            url,
            range: range.filter(|r| !r.is_empty()),
        }
    }

    /// Value of the `Range` header this request carries, if any.
    #[must_use]
    pub fn range_header(&self) -> Option<String> {
        self.range.and_then(|r| r.header_value())
    }
}

/// Response to a [`TransportRequest`].
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body, read lazily.
    pub body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    /// Parses the `Content-Length` header.
    ///
    /// The header is read directly because `HEAD` responses carry no body
    /// for a client to size.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Parses a single-part `Content-Range: bytes a-b/total` header into
    /// the range the body covers. The total may be `*`.
    #[must_use]
    pub fn content_range(&self) -> Option<ByteRange> {
        let value = self.headers.get(CONTENT_RANGE)?.to_str().ok()?.trim();
        let (unit, spec) = value.split_once(' ')?;
        if !unit.eq_ignore_ascii_case("bytes") {
            return None;
        }
        let (bounds, total) = spec.trim().split_once('/')?;
        if total != "*" {
            total.parse::<u64>().ok()?;
        }
        let (first, last) = bounds.split_once('-')?;
        ByteRange::from_inclusive(first.parse().ok()?, last.parse().ok()?)
    }

    /// Returns `true` if `Accept-Ranges` lists the `bytes` unit.
    #[must_use]
    pub fn accepts_byte_ranges(&self) -> bool {
        self.headers
            .get_all(ACCEPT_RANGES)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
    }
}

/// Executes HTTP requests on behalf of the downloader.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `request` and returns the response once headers have arrived.
    ///
    /// Any status code is a successful response here; interpreting it is
    /// the caller's job.
    async fn execute(&self, request: TransportRequest)
    -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use rangedl::download::{DownloadConfig, Downloader, FsOpener, ReqwestTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let downloader = Downloader::new(
///     Arc::new(ReqwestTransport::new()),
///     Arc::new(FsOpener),
///     DownloadConfig::default(),
/// )?;
/// let outcome = downloader.download("https://example.com/big.iso").await?;
/// println!("{} bytes", outcome.bytes_written);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Creates a transport with default timeouts (30s connect, 5min read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a transport with explicit timeout values in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let range_header = request.range_header();
        let mut builder = self
            .client
            .request(request.method, request.url)
            // Ranges must address the stored representation, not a compressed one.
            .header(ACCEPT_ENCODING, "identity");
        if let Some(range) = &range_header {
            builder = builder.header(RANGE, range.as_str());
        }

        let response = builder.send().await?;
        debug!(status = response.status().as_u16(), range = ?range_header, "response headers received");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
