//! Constants for the download module (timeouts, concurrency bounds, buffers).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes without a byte arriving).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Upper bound on simultaneous segment connections for one download.
pub const MAX_CONCURRENCY: usize = 16;

/// Default number of segments fetched in parallel.
pub const DEFAULT_CONCURRENCY: usize = MAX_CONCURRENCY;

/// Default size of the chunks forwarded from a fetcher to the writer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default minimum segment length in bytes.
///
/// A resource is split into at most `size / min_segment_size` segments.
pub const DEFAULT_MIN_SEGMENT_SIZE: u64 = 1;

/// Filename used when the URL path has no usable final segment.
pub const FALLBACK_FILENAME: &str = "index.html";
