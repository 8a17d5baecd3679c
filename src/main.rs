//! CLI entry point for rangedl.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rangedl::download::{
    DownloadConfig, DownloadHandle, DownloadState, Downloader, FsOpener, Progress,
    ReqwestTransport, RetryPolicy, download_with_retry,
};
use tokio::sync::watch;
use tracing::{debug, info};

mod cli;

use cli::Args;

const PROGRESS_TICK: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = DownloadConfig {
        max_concurrency: usize::from(args.concurrency),
        buffer_size: usize::try_from(args.buffer_size).context("buffer size too large")?,
        min_segment_size: args.min_segment_size,
        output_dir: args.output_dir.clone(),
    };
    let downloader = Downloader::new(
        Arc::new(ReqwestTransport::new()),
        Arc::new(FsOpener),
        config,
    )?;
    let policy = RetryPolicy::with_max_attempts(u32::from(args.max_retries) + 1);

    let url = args.target_url().context("a URL is required")?;
    let show_progress = !args.quiet && !args.no_progress;
    let outcome = download_with_retry(&downloader, url, &policy, |attempt, handle| {
        debug!(attempt, path = %handle.path().display(), "attempt started");
        if show_progress {
            spawn_progress_bar(handle);
        }
    })
    .await?;

    info!(
        path = %outcome.path.display(),
        bytes = outcome.bytes_written,
        segments = outcome.segments.len(),
        ranged = outcome.ranged,
        "Download complete"
    );

    Ok(())
}

/// Draws a bar for one attempt until its download reaches a terminal state.
fn spawn_progress_bar(handle: &DownloadHandle) {
    let progress = handle.progress();
    let state = handle.subscribe();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{wide_bar}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );

    tokio::spawn(render_progress(bar, progress, state));
}

async fn render_progress(
    bar: ProgressBar,
    progress: Arc<Progress>,
    mut state: watch::Receiver<DownloadState>,
) {
    let mut ticker = tokio::time::interval(PROGRESS_TICK);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if let Some(total) = progress.total_size() {
            bar.set_length(total);
        }
        bar.set_position(progress.bytes_written());

        if state.borrow().is_terminal() {
            break;
        }
    }
    bar.finish_and_clear();
}
