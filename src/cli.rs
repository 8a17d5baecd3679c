//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use rangedl::download::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_SEGMENT_SIZE,
    MAX_CONCURRENCY,
};

/// Download a file over parallel HTTP range requests.
///
/// The resource is split into byte ranges that are fetched concurrently and
/// written straight into place. Servers without range support are
/// downloaded with a single request.
#[derive(Parser, Debug)]
#[command(name = "rangedl")]
#[command(author, version, about)]
pub struct Args {
    /// URL of the resource to download
    #[arg(value_name = "URL", required_unless_present = "url_flag")]
    pub url: Option<String>,

    /// URL of the resource to download, as a flag
    #[arg(
        short = 'u',
        long = "url",
        value_name = "URL",
        id = "url_flag",
        conflicts_with = "url"
    )]
    pub url_flag: Option<String>,

    /// Directory to write the file into
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Maximum concurrent segments (1-16)
    #[arg(
        short = 'c',
        long,
        default_value_t = DEFAULT_CONCURRENCY as u8,
        value_parser = clap::value_parser!(u8).range(1..=MAX_CONCURRENCY as i64)
    )]
    pub concurrency: u8,

    /// Size in bytes of the chunks handed to the writer
    #[arg(
        short = 'b',
        long,
        default_value_t = DEFAULT_BUFFER_SIZE as u64,
        value_parser = clap::value_parser!(u64).range(1..=16 * 1024 * 1024)
    )]
    pub buffer_size: u64,

    /// Smallest segment worth its own connection, in bytes
    #[arg(
        long,
        default_value_t = DEFAULT_MIN_SEGMENT_SIZE,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub min_segment_size: u64,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(
        short = 'r',
        long,
        default_value_t = (DEFAULT_MAX_ATTEMPTS - 1) as u8,
        value_parser = clap::value_parser!(u8).range(0..=10)
    )]
    pub max_retries: u8,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// The URL given either positionally or with `-u`.
    pub fn target_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.url_flag.as_deref())
    }
}
