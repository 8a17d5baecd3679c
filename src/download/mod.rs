//! Segmented HTTP download engine.
//!
//! A resource is probed with `HEAD`, split into contiguous byte ranges, and
//! fetched over several concurrent ranged `GET`s. Every segment streams
//! offset-tagged chunks into a single positional writer, so the file is
//! assembled in place regardless of the order in which segments finish.
//! Servers that do not advertise `Accept-Ranges: bytes`, or that report no
//! size, are downloaded with one unranged request instead.
//!
//! # Features
//!
//! - Up to 16 concurrent segments (configurable, default 16)
//! - Exact length checks per segment and for the assembled file
//! - Fail fast: the first segment error cancels the rest
//! - Injectable [`Transport`] and [`FileOpener`] for testing
//! - Optional whole-download retry with exponential backoff
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rangedl::download::{DownloadConfig, Downloader, FsOpener, ReqwestTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(
//!     Arc::new(ReqwestTransport::new()),
//!     Arc::new(FsOpener),
//!     DownloadConfig::default(),
//! )?;
//! let outcome = downloader.download("https://example.com/archive.tar").await?;
//! println!("Downloaded {} bytes to {}", outcome.bytes_written, outcome.path.display());
//! # Ok(())
//! # }
//! ```

mod constants;
mod coordinator;
mod error;
mod fetcher;
mod filename;
mod probe;
mod progress;
mod range;
mod retry;
mod transport;
mod writer;

pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MIN_SEGMENT_SIZE,
    FALLBACK_FILENAME, MAX_CONCURRENCY, READ_TIMEOUT_SECS,
};
pub use coordinator::{
    DownloadConfig, DownloadHandle, DownloadOutcome, DownloadPlan, DownloadState, Downloader,
    Segment, SegmentState,
};
pub use error::{DownloadError, ErrorKind, TransportError};
pub use fetcher::{SegmentFetcher, SegmentSpec};
pub use probe::{ResourceInfo, probe};
pub use progress::Progress;
pub use range::{ByteRange, plan};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
    download_with_retry,
};
pub use transport::{
    BodyStream, ReqwestTransport, Transport, TransportRequest, TransportResponse,
};
pub use writer::{Chunk, ChunkSink, DestinationFile, FileOpener, FsOpener, Writer};

// No module-local Result aliases: signatures spell out `Result<T, DownloadError>`.
