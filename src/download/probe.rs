//! Capability probe: discovers resource size and byte-range support.

use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;
use super::transport::{Transport, TransportRequest};

/// What the probe learned about a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Total size in bytes, when the server reported a usable `Content-Length`.
    pub total_size: Option<u64>,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub ranges_supported: bool,
}

impl ResourceInfo {
    /// Returns the total size, or [`DownloadError::SizeUnknown`] if the
    /// server did not report one.
    ///
    /// # Errors
    ///
    /// Fails when `total_size` is `None`.
    pub fn require_size(&self, url: &str) -> Result<u64, DownloadError> {
        self.total_size
            .ok_or_else(|| DownloadError::size_unknown(url))
    }
}

/// Issues a `HEAD` request for `url` and reports size and range support.
///
/// Range support is only assumed when the server explicitly advertises the
/// `bytes` unit. No file is touched.
///
/// # Errors
///
/// Returns [`DownloadError::Probe`] when the request fails or the server
/// answers with a non-success status.
#[instrument(skip_all, fields(url = %url))]
pub async fn probe(transport: &dyn Transport, url: &Url) -> Result<ResourceInfo, DownloadError> {
    let response = transport
        .execute(TransportRequest::head(url.clone()))
        .await
        .map_err(|e| DownloadError::probe_transport(url.as_str(), e))?;

    if !response.status.is_success() {
        return Err(DownloadError::probe_status(
            url.as_str(),
            response.status.as_u16(),
        ));
    }

    let info = ResourceInfo {
        total_size: response.content_length(),
        ranges_supported: response.accepts_byte_ranges(),
    };
    debug!(
        total_size = ?info.total_size,
        ranges_supported = info.ranges_supported,
        "probe complete"
    );
    Ok(info)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::error::{ErrorKind, TransportError};
    use crate::download::transport::TransportResponse;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[derive(Debug)]
    struct HeadOnly {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl Transport for HeadOnly {
        async fn execute(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            assert_eq!(request.method, reqwest::Method::HEAD);
            let mut headers = HeaderMap::new();
            for (name, value) in &self.headers {
                headers.append(*name, HeaderValue::from_static(value));
            }
            Ok(TransportResponse {
                status: self.status,
                headers,
                body: futures_util::stream::empty().boxed(),
            })
        }
    }

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn execute(
            &self,
            _request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            Err(TransportError::other("connection refused"))
        }
    }

    fn url() -> Url {
        Url::parse("https://example.com/file.iso").unwrap()
    }

    #[tokio::test]
    async fn test_probe_reads_size_and_range_support() {
        let transport = HeadOnly {
            status: StatusCode::OK,
            headers: vec![("content-length", "83"), ("accept-ranges", "bytes")],
        };
        let info = probe(&transport, &url()).await.unwrap();
        assert_eq!(info.total_size, Some(83));
        assert!(info.ranges_supported);
        assert_eq!(info.require_size("x").unwrap(), 83);
    }

    #[tokio::test]
    async fn test_probe_without_accept_ranges_is_unsupported() {
        let transport = HeadOnly {
            status: StatusCode::OK,
            headers: vec![("content-length", "83")],
        };
        let info = probe(&transport, &url()).await.unwrap();
        assert!(!info.ranges_supported);
    }

    #[tokio::test]
    async fn test_probe_missing_length_requires_size_fails() {
        let transport = HeadOnly {
            status: StatusCode::OK,
            headers: vec![("accept-ranges", "bytes")],
        };
        let info = probe(&transport, &url()).await.unwrap();
        assert_eq!(info.total_size, None);
        let error = info.require_size(url().as_str()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SizeUnknown);
    }

    #[tokio::test]
    async fn test_probe_error_status_is_probe_error() {
        let transport = HeadOnly {
            status: StatusCode::NOT_FOUND,
            headers: vec![],
        };
        let error = probe(&transport, &url()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Probe);
        assert_eq!(error.status(), Some(404));
    }

    #[tokio::test]
    async fn test_probe_transport_failure_is_probe_error() {
        let error = probe(&Unreachable, &url()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Probe);
        assert!(error.status().is_none());
    }
}
