//! Shared fakes for integration tests: an in-memory HTTP server that honours
//! `Range` headers, and file openers that fail on open or on write.

#![allow(dead_code)]

pub mod socket_guard;

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use rangedl::download::{
    DestinationFile, FileOpener, Transport, TransportError, TransportRequest, TransportResponse,
};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncSeek, AsyncWrite, SeekFrom};

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 3)) as u8)
        .collect()
}

/// In-memory resource server.
///
/// `HEAD` reports the size and `Accept-Ranges: bytes` as configured. `GET`
/// with a `Range` answers `206` with exactly that slice and a matching
/// `Content-Range`, `GET` without one
/// answers `200` with the whole body. Every `GET` is counted and its range
/// recorded.
#[derive(Debug)]
pub struct MemoryServer {
    body: Bytes,
    ranges: bool,
    advertise_size: bool,
    ignore_range_on_get: bool,
    piece_size: usize,
    head_status: StatusCode,
    /// Segment starting at this offset comes back `truncate_by` bytes short.
    short_segment: Option<(u64, usize)>,
    /// Segment starting at this offset is answered with the same number of
    /// bytes taken from the start of the resource.
    shifted_segment: Option<u64>,
    /// Segment starting at this offset is answered with `500`.
    failing_segment: Option<u64>,
    /// Bodies of all other segments never produce a byte.
    stall_others: bool,
    /// The first `n` GETs are answered with `503`.
    unavailable_gets: AtomicUsize,
    gets: AtomicUsize,
    seen: Mutex<Vec<Option<String>>>,
}

impl MemoryServer {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ranges: true,
            advertise_size: true,
            ignore_range_on_get: false,
            piece_size: 1000,
            head_status: StatusCode::OK,
            short_segment: None,
            shifted_segment: None,
            failing_segment: None,
            stall_others: false,
            unavailable_gets: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }

    pub fn without_size(mut self) -> Self {
        self.advertise_size = false;
        self
    }

    pub fn ignoring_range_on_get(mut self) -> Self {
        self.ignore_range_on_get = true;
        self
    }

    pub fn with_piece_size(mut self, piece_size: usize) -> Self {
        self.piece_size = piece_size.max(1);
        self
    }

    pub fn with_head_status(mut self, status: StatusCode) -> Self {
        self.head_status = status;
        self
    }

    pub fn with_short_segment(mut self, start: u64, truncate_by: usize) -> Self {
        self.short_segment = Some((start, truncate_by));
        self
    }

    pub fn with_shifted_segment(mut self, start: u64) -> Self {
        self.shifted_segment = Some(start);
        self
    }

    pub fn with_failing_segment(mut self, start: u64) -> Self {
        self.failing_segment = Some(start);
        self
    }

    pub fn stalling_others(mut self) -> Self {
        self.stall_others = true;
        self
    }

    pub fn with_unavailable_gets(self, count: usize) -> Self {
        self.unavailable_gets.store(count, Ordering::SeqCst);
        self
    }

    /// Number of `GET` requests received.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// `Range` header of every `GET`, in arrival order.
    pub fn range_headers(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }

    fn head(&self) -> TransportResponse {
        let mut headers = HeaderMap::new();
        if self.advertise_size {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len() as u64));
        }
        if self.ranges {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        respond(self.head_status, headers, Vec::new())
    }

    fn get(&self, request: &TransportRequest) -> TransportResponse {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.range_header());

        let unavailable = self
            .unavailable_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if unavailable {
            return respond(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), Vec::new());
        }

        let range = request
            .range
            .filter(|_| self.ranges && !self.ignore_range_on_get);
        let Some(range) = range else {
            return respond(StatusCode::OK, HeaderMap::new(), self.pieces(self.body.clone()));
        };

        let start = range.start();
        if self.failing_segment == Some(start) {
            return respond(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), Vec::new());
        }
        if self.stall_others {
            return TransportResponse {
                status: StatusCode::PARTIAL_CONTENT,
                headers: content_range(start, range.last(), self.body.len()),
                body: futures_util::stream::pending().boxed(),
            };
        }

        let mut from = usize::try_from(start).unwrap();
        let mut to = usize::try_from(range.end_exclusive()).unwrap().min(self.body.len());
        if self.shifted_segment == Some(start) {
            to -= from;
            from = 0;
        }
        let headers = content_range(from as u64, (to - 1) as u64, self.body.len());
        if let Some((short_start, truncate_by)) = self.short_segment
            && short_start == start
        {
            to = to.saturating_sub(truncate_by).max(from);
        }
        respond(
            StatusCode::PARTIAL_CONTENT,
            headers,
            self.pieces(self.body.slice(from..to)),
        )
    }

    fn pieces(&self, mut data: Bytes) -> Vec<Bytes> {
        let mut pieces = Vec::new();
        while !data.is_empty() {
            pieces.push(data.split_to(data.len().min(self.piece_size)));
        }
        pieces
    }
}

fn content_range(first: u64, last: u64, total: usize) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = format!("bytes {first}-{last}/{total}");
    headers.insert(CONTENT_RANGE, HeaderValue::from_str(&value).unwrap());
    headers
}

fn respond(status: StatusCode, headers: HeaderMap, pieces: Vec<Bytes>) -> TransportResponse {
    TransportResponse {
        status,
        headers,
        body: futures_util::stream::iter(pieces.into_iter().map(Ok)).boxed(),
    }
}

#[async_trait]
impl Transport for MemoryServer {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        if request.method == Method::HEAD {
            Ok(self.head())
        } else {
            Ok(self.get(&request))
        }
    }
}

/// Opener that refuses to open anything.
#[derive(Debug, Default)]
pub struct FailingOpener;

#[async_trait]
impl FileOpener for FailingOpener {
    async fn open(
        &self,
        _path: &Path,
        _size_hint: Option<u64>,
    ) -> io::Result<Box<dyn DestinationFile>> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "destination is read-only",
        ))
    }
}

/// Opener that never finishes opening.
#[derive(Debug, Default)]
pub struct StalledOpener;

#[async_trait]
impl FileOpener for StalledOpener {
    async fn open(
        &self,
        _path: &Path,
        _size_hint: Option<u64>,
    ) -> io::Result<Box<dyn DestinationFile>> {
        std::future::pending().await
    }
}

/// Opener whose files accept seeks but fail every write.
#[derive(Debug, Default)]
pub struct BrokenDiskOpener;

#[async_trait]
impl FileOpener for BrokenDiskOpener {
    async fn open(
        &self,
        _path: &Path,
        _size_hint: Option<u64>,
    ) -> io::Result<Box<dyn DestinationFile>> {
        Ok(Box::new(BrokenFile))
    }
}

struct BrokenFile;

impl AsyncWrite for BrokenFile {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::other("no space left on device")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for BrokenFile {
    fn start_seek(self: Pin<&mut Self>, _position: SeekFrom) -> io::Result<()> {
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(0))
    }
}
