//! Shared byte counters for progress reporting.

use std::sync::atomic::{AtomicU64, Ordering};

const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Bytes landed on disk so far, plus the total once it is known.
///
/// The writer records every successful chunk write; readers such as the CLI
/// progress bar poll it through [`DownloadHandle::progress`](super::DownloadHandle::progress).
#[derive(Debug)]
pub struct Progress {
    written: AtomicU64,
    total: AtomicU64,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    /// Creates a counter with nothing written and an unknown total.
    #[must_use]
    pub fn new() -> Self {
        Self {
            written: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN_TOTAL),
        }
    }

    pub(crate) fn record(&self, bytes: u64) {
        self.written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        self.total
            .store(total.unwrap_or(UNKNOWN_TOTAL), Ordering::Relaxed);
    }

    /// Bytes written to the destination so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Total resource size, once probed and known.
    #[must_use]
    pub fn total_size(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    /// Completed fraction in `0.0..=1.0`, if the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_size()?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.bytes_written() as f64 / total as f64).min(1.0))
    }
}
