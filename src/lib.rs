//! rangedl core library
//!
//! Downloads a single HTTP resource over several concurrent byte-range
//! requests and assembles the pieces into one file on disk.
//!
//! # Architecture
//!
//! Everything lives in the [`download`] module:
//! - range planning ([`download::plan`], [`download::ByteRange`])
//! - an injectable HTTP [`download::Transport`] backed by reqwest
//! - the `HEAD` capability [`download::probe`]
//! - per-segment fetchers feeding a positional [`download::Writer`]
//! - the [`download::Downloader`] coordinator and its [`download::DownloadHandle`]
//! - whole-download retry ([`download::download_with_retry`])

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;

// Re-export commonly used types
pub use download::{
    ByteRange, DownloadConfig, DownloadError, DownloadHandle, DownloadOutcome, DownloadState,
    Downloader, ErrorKind, FsOpener, Progress, ReqwestTransport, RetryPolicy, Transport,
    download_with_retry,
};
