//! Segment fetcher: one ranged GET streamed into a [`ChunkSink`].

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;
use super::range::ByteRange;
use super::transport::{Transport, TransportRequest};
use super::writer::{Chunk, ChunkSink};

/// What one fetcher is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpec {
    /// Position of the segment in the plan.
    pub index: usize,
    /// Bytes the segment covers.
    pub range: ByteRange,
    /// Whether to send a `Range` header. `false` for the single-stream fallback.
    pub ranged: bool,
    /// Length the body must have. For ranged segments this is the range
    /// length; for the fallback it is the probed size when known.
    pub expected_len: Option<u64>,
}

impl SegmentSpec {
    /// A segment fetched with a `Range` header.
    #[must_use]
    pub fn ranged(index: usize, range: ByteRange) -> Self {
        Self {
            index,
            range,
            ranged: true,
            expected_len: Some(range.len()),
        }
    }

    /// The whole resource in one unranged request.
    #[must_use]
    pub fn whole(total_size: Option<u64>) -> Self {
        Self {
            index: 0,
            range: ByteRange::new(0, total_size.unwrap_or(0)),
            ranged: false,
            expected_len: total_size,
        }
    }
}

/// Performs ranged GETs for one resource.
///
/// Safe to share between concurrent segment tasks; each call to
/// [`fetch`](Self::fetch) owns its own response stream.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    transport: Arc<dyn Transport>,
    url: Url,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl SegmentFetcher {
    /// Creates a fetcher for `url` that forwards chunks of at most
    /// `buffer_size` bytes.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, url: Url, buffer_size: usize) -> Self {
        Self {
            transport,
            url,
            buffer_size: buffer_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops reading as soon as `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetches `segment` and streams it into `sink`, returning the bytes
    /// received.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Request`] if the request fails, the status is not
    ///   a success, or a ranged request is not answered with `206` and a
    ///   `Content-Range` matching the requested bytes.
    /// - [`DownloadError::Read`] if the body stream breaks.
    /// - [`DownloadError::CorruptSegment`] if the body is shorter or longer
    ///   than the expected length. Excess bytes are never written.
    /// - [`DownloadError::Cancelled`] if the cancellation token fires.
    /// - Any error returned by the sink.
    #[instrument(
        level = "debug",
        skip_all,
        fields(url = %self.url, segment = segment.index, range = %segment.range)
    )]
    pub async fn fetch(
        &self,
        segment: SegmentSpec,
        sink: &dyn ChunkSink,
    ) -> Result<u64, DownloadError> {
        let url = self.url.as_str();
        let range = segment.range;
        let request = TransportRequest::get(self.url.clone(), segment.ranged.then_some(range));
        let partial = request.range.is_some();

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            response = self.transport.execute(request) => response,
        }
        .map_err(|e| DownloadError::request_transport(url, range, e))?;

        let status = response.status;
        if !status.is_success() {
            return Err(DownloadError::request_status(
                url,
                range,
                status.as_u16(),
                format!("HTTP {}", status.as_u16()),
            ));
        }
        if partial && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::request_status(
                url,
                range,
                status.as_u16(),
                "server ignored the Range header",
            ));
        }
        if partial {
            let served = response.content_range();
            if served != Some(range) {
                return Err(DownloadError::request_status(
                    url,
                    range,
                    status.as_u16(),
                    match served {
                        Some(served) => format!("server answered with range {served}"),
                        None => "missing or malformed Content-Range".to_string(),
                    },
                ));
            }
        }

        let expected = if partial {
            Some(range.len())
        } else {
            segment.expected_len.or_else(|| response.content_length())
        };
        debug!(status = status.as_u16(), expected = ?expected, "segment response received");

        let mut body = response.body;
        let mut offset = range.start();
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
                next = body.next() => next,
            };
            let mut bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(DownloadError::read(url, range, received, e)),
            };

            while !bytes.is_empty() {
                let data = bytes.split_to(bytes.len().min(self.buffer_size));
                let len = data.len() as u64;
                if let Some(expected) = expected
                    && received + len > expected
                {
                    return Err(DownloadError::corrupt_segment(
                        url,
                        range,
                        expected,
                        received + len,
                    ));
                }

                sink.write(Chunk {
                    segment: segment.index,
                    offset,
                    data,
                })
                .await?;
                offset += len;
                received += len;
            }
        }

        if let Some(expected) = expected
            && received != expected
        {
            return Err(DownloadError::corrupt_segment(url, range, expected, received));
        }

        debug!(received, "segment complete");
        Ok(received)
    }
}
