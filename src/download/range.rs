//! Byte range planning.
//!
//! Ranges use the HTTP convention: both ends are inclusive, so a range
//! starting at 0 with a length of 40 covers bytes `0-39` and is requested
//! with `Range: bytes=0-39`. Internally a range is stored as a start offset
//! plus a length, which keeps the empty range of a zero-byte resource
//! representable without special casing the arithmetic.

use std::fmt;

/// A contiguous byte interval of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    start: u64,
    len: u64,
}

impl ByteRange {
    /// Creates a range of `len` bytes beginning at `start`.
    #[must_use]
    pub const fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// Creates a range from inclusive bounds, as found in a `Content-Range`
    /// header.
    ///
    /// Returns `None` when `last < start`.
    #[must_use]
    pub fn from_inclusive(start: u64, last: u64) -> Option<Self> {
        (last >= start).then(|| Self::new(start, last - start + 1))
    }

    /// The degenerate `[0,0]` range planned for an empty resource.
    #[must_use]
    pub const fn empty() -> Self {
        Self { start: 0, len: 0 }
    }

    /// First byte covered by the range.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Number of bytes covered by the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` for the degenerate range of an empty resource.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inclusive end offset. For an empty range this is `start`.
    #[must_use]
    pub const fn last(&self) -> u64 {
        if self.len == 0 {
            self.start
        } else {
            self.start + self.len - 1
        }
    }

    /// Exclusive end offset, i.e. the start of the following range.
    #[must_use]
    pub const fn end_exclusive(&self) -> u64 {
        self.start + self.len
    }

    /// Value for the HTTP `Range` request header.
    ///
    /// Returns `None` for an empty range, which cannot be expressed as a
    /// satisfiable byte range.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        (!self.is_empty()).then(|| format!("bytes={}-{}", self.start, self.last()))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.last())
    }
}

/// Splits `total_size` bytes into `segment_count` contiguous ranges.
///
/// Every range but the last has `total_size / segment_count` bytes; the last
/// one also absorbs the remainder, so the lengths always sum to
/// `total_size`. An empty resource yields the single degenerate range
/// `[0,0]`. A `segment_count` of zero is treated as one.
///
/// # Example
///
/// ```
/// use rangedl::download::plan;
///
/// let ranges = plan(83, 2);
/// assert_eq!(ranges[0].len(), 41);
/// assert_eq!(ranges[1].len(), 42);
/// assert_eq!(ranges[1].last(), 82);
/// ```
#[must_use]
pub fn plan(total_size: u64, segment_count: usize) -> Vec<ByteRange> {
    if total_size == 0 {
        return vec![ByteRange::empty()];
    }

    let count = segment_count.max(1) as u64;
    let base = total_size / count;
    let remainder = total_size % count;

    let mut ranges = Vec::with_capacity(segment_count.max(1));
    let mut start = 0u64;
    for _ in 0..count - 1 {
        ranges.push(ByteRange::new(start, base));
        start += base;
    }
    ranges.push(ByteRange::new(start, base + remainder));
    ranges
}
