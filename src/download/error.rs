//! Error types for the download module.
//!
//! Every failure of a download surfaces as exactly one [`DownloadError`].
//! Segment-level variants carry the affected [`ByteRange`] so the caller can
//! tell which part of the resource went wrong.

use std::path::PathBuf;

use thiserror::Error;

use super::range::ByteRange;

/// Failure reported by a [`Transport`](super::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error raised by the reqwest client (connect, TLS, timeout, body read).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// IO error raised while producing response bytes.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other transport failure, described by a message.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates a transport error from a plain message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns `true` if the underlying client reported a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout(),
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            Self::Other(_) => false,
        }
    }
}

/// Errors that can occur during a segmented download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The provided URL is malformed or not absolute.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The download configuration is out of bounds.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The capability probe could not determine size or range support.
    #[error("probe failed for {url}: {reason}")]
    Probe {
        /// The probed URL.
        url: String,
        /// Short description of the failure.
        reason: String,
        /// HTTP status code when the server answered with an error.
        status: Option<u16>,
        /// Transport failure, if the request never got a response.
        #[source]
        source: Option<TransportError>,
    },

    /// The server did not report a usable `Content-Length`.
    #[error("size of {url} is unknown: no usable Content-Length")]
    SizeUnknown {
        /// The probed URL.
        url: String,
    },

    /// A segment's request failed before any body bytes were read.
    #[error("request for bytes {range} of {url} failed: {reason}")]
    Request {
        /// The requested URL.
        url: String,
        /// The segment's byte range.
        range: ByteRange,
        /// Short description of the failure.
        reason: String,
        /// HTTP status code when the server answered with an unusable status.
        status: Option<u16>,
        /// Transport failure, if the request never got a response.
        #[source]
        source: Option<TransportError>,
    },

    /// A segment's body stream broke mid-transfer.
    #[error("stream for bytes {range} of {url} broke after {received} bytes")]
    Read {
        /// The requested URL.
        url: String,
        /// The segment's byte range.
        range: ByteRange,
        /// Bytes received before the stream broke.
        received: u64,
        /// The underlying stream error.
        #[source]
        source: TransportError,
    },

    /// A segment delivered a different number of bytes than planned.
    #[error("corrupt segment {range} of {url}: expected {expected} bytes, received {received}")]
    CorruptSegment {
        /// The requested URL.
        url: String,
        /// The segment's byte range.
        range: ByteRange,
        /// Planned length of the segment.
        expected: u64,
        /// Bytes actually received (counted up to the first excess chunk).
        received: u64,
    },

    /// Destination file could not be opened, written or closed.
    #[error("IO error writing to {path}: {source}")]
    Write {
        /// The destination file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The assembled file size does not match the probed resource size.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Destination file path.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Bytes actually written.
        actual_bytes: u64,
    },

    /// The caller cancelled the download.
    #[error("download of {url} was cancelled")]
    Cancelled {
        /// The URL being downloaded.
        url: String,
    },

    /// A download task panicked or was aborted unexpectedly.
    #[error("download task for {url} failed: {reason}")]
    TaskFailed {
        /// The URL being downloaded.
        url: String,
        /// Description of the task failure.
        reason: String,
    },
}

/// Coarse classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`DownloadError::InvalidUrl`].
    InvalidUrl,
    /// See [`DownloadError::InvalidConfig`].
    InvalidConfig,
    /// See [`DownloadError::Probe`].
    Probe,
    /// See [`DownloadError::SizeUnknown`].
    SizeUnknown,
    /// See [`DownloadError::Request`].
    Request,
    /// See [`DownloadError::Read`].
    Read,
    /// See [`DownloadError::CorruptSegment`].
    CorruptSegment,
    /// See [`DownloadError::Write`].
    Write,
    /// See [`DownloadError::Integrity`].
    Integrity,
    /// See [`DownloadError::Cancelled`].
    Cancelled,
    /// See [`DownloadError::TaskFailed`].
    TaskFailed,
}

impl DownloadError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates a probe error caused by a transport failure.
    pub fn probe_transport(url: impl Into<String>, source: TransportError) -> Self {
        let reason = if source.is_timeout() {
            "timed out".to_string()
        } else {
            "transport error".to_string()
        };
        Self::Probe {
            url: url.into(),
            reason,
            status: None,
            source: Some(source),
        }
    }

    /// Creates a probe error for an error status response.
    pub fn probe_status(url: impl Into<String>, status: u16) -> Self {
        Self::Probe {
            url: url.into(),
            reason: format!("HTTP {status}"),
            status: Some(status),
            source: None,
        }
    }

    /// Creates a size-unknown error.
    pub fn size_unknown(url: impl Into<String>) -> Self {
        Self::SizeUnknown { url: url.into() }
    }

    /// Creates a request error caused by a transport failure.
    pub fn request_transport(
        url: impl Into<String>,
        range: ByteRange,
        source: TransportError,
    ) -> Self {
        let reason = if source.is_timeout() {
            "timed out".to_string()
        } else {
            "transport error".to_string()
        };
        Self::Request {
            url: url.into(),
            range,
            reason,
            status: None,
            source: Some(source),
        }
    }

    /// Creates a request error for an unusable response status.
    pub fn request_status(
        url: impl Into<String>,
        range: ByteRange,
        status: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self::Request {
            url: url.into(),
            range,
            reason: reason.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Creates a mid-stream read error.
    pub fn read(
        url: impl Into<String>,
        range: ByteRange,
        received: u64,
        source: TransportError,
    ) -> Self {
        Self::Read {
            url: url.into(),
            range,
            received,
            source,
        }
    }

    /// Creates a corrupt segment error.
    pub fn corrupt_segment(
        url: impl Into<String>,
        range: ByteRange,
        expected: u64,
        received: u64,
    ) -> Self {
        Self::CorruptSegment {
            url: url.into(),
            range,
            expected,
            received,
        }
    }

    /// Creates a destination write error.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a task failure error.
    pub fn task_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::Probe { .. } => ErrorKind::Probe,
            Self::SizeUnknown { .. } => ErrorKind::SizeUnknown,
            Self::Request { .. } => ErrorKind::Request,
            Self::Read { .. } => ErrorKind::Read,
            Self::CorruptSegment { .. } => ErrorKind::CorruptSegment,
            Self::Write { .. } => ErrorKind::Write,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::TaskFailed { .. } => ErrorKind::TaskFailed,
        }
    }

    /// Returns the byte range affected by a segment-level error.
    #[must_use]
    pub fn range(&self) -> Option<ByteRange> {
        match self {
            Self::Request { range, .. }
            | Self::Read { range, .. }
            | Self::CorruptSegment { range, .. } => Some(*range),
            _ => None,
        }
    }

    /// Returns the HTTP status attached to a probe or request error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Probe { status, .. } | Self::Request { status, .. } => *status,
            _ => None,
        }
    }
}

// Errors need context (url, range, path) that the source errors lack, so
// there are no `From<reqwest::Error>` / `From<std::io::Error>` impls; use the
// constructors above.
