//! Download coordinator: probe, plan, fetch concurrently, assemble.
//!
//! A [`Downloader`] is built once with an explicit transport and file opener
//! and can start any number of downloads. Each call to
//! [`Downloader::start`] spawns a coordinating task and returns a
//! [`DownloadHandle`] through which the caller observes state and progress,
//! cancels, or awaits the single outcome.
//!
//! # Lifecycle
//!
//! ```text
//! Created -> Probing -> Planning -> Fetching -> Assembling -> Completed
//!                \          \           \            \
//!                 `----------`-----------`------------`--> Failed
//! ```
//!
//! The first fatal error wins: the remaining segments are cancelled and
//! drained, the destination handle is closed and the partial file is left on
//! disk for the caller to deal with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MIN_SEGMENT_SIZE, MAX_CONCURRENCY,
};
use super::error::DownloadError;
use super::fetcher::{SegmentFetcher, SegmentSpec};
use super::filename::filename_from_url;
use super::probe::{ResourceInfo, probe};
use super::progress::Progress;
use super::range::{ByteRange, plan};
use super::transport::{ReqwestTransport, Transport};
use super::writer::{FileOpener, FsOpener, Writer};

/// Tunables for a [`Downloader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Maximum number of segments fetched at once (1 to [`MAX_CONCURRENCY`]).
    pub max_concurrency: usize,
    /// Maximum size of a chunk handed from a fetcher to the writer.
    pub buffer_size: usize,
    /// Smallest segment worth its own connection.
    pub min_segment_size: u64,
    /// Directory the destination file is created in.
    pub output_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            min_segment_size: DEFAULT_MIN_SEGMENT_SIZE,
            output_dir: PathBuf::from("."),
        }
    }
}

impl DownloadConfig {
    /// Checks every field against its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(DownloadError::invalid_config(format!(
                "max_concurrency {} must be between 1 and {MAX_CONCURRENCY}",
                self.max_concurrency
            )));
        }
        if self.buffer_size == 0 {
            return Err(DownloadError::invalid_config(
                "buffer_size must be greater than zero",
            ));
        }
        if self.min_segment_size == 0 {
            return Err(DownloadError::invalid_config(
                "min_segment_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Where a download is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Handle created, coordinator not yet running.
    Created,
    /// Waiting for the capability probe.
    Probing,
    /// Computing segments and opening the destination.
    Planning,
    /// Segments in flight.
    Fetching,
    /// All segments done, finalizing the destination.
    Assembling,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl DownloadState {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Runtime state of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Planned, not started.
    Pending,
    /// Fetch task running.
    InFlight,
    /// All planned bytes received and written.
    Completed,
    /// The fetch failed or was cancelled.
    Failed,
}

/// One planned segment and what happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Position in the plan; also the segment's ownership id.
    pub index: usize,
    /// Bytes the segment covers.
    pub range: ByteRange,
    /// Current state.
    pub state: SegmentState,
    /// Bytes received so far (set when the fetch completes).
    pub received: u64,
}

/// The segments chosen for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    /// Planned ranges, in offset order.
    pub ranges: Vec<ByteRange>,
    /// `true` when ranges are requested with `Range` headers.
    pub ranged: bool,
}

impl DownloadPlan {
    /// Chooses between a multi-segment plan and the single-stream fallback.
    ///
    /// Multiple segments are only planned when the server supports byte
    /// ranges, the size is known, and the resource is large enough for at
    /// least two segments of `min_segment_size` bytes. The segment count is
    /// capped at `max_concurrency`.
    #[must_use]
    pub fn for_resource(info: &ResourceInfo, config: &DownloadConfig) -> Self {
        if let Some(size) = info.total_size
            && info.ranges_supported
        {
            let by_size = size / config.min_segment_size.max(1);
            let count = usize::try_from(by_size)
                .unwrap_or(usize::MAX)
                .min(config.max_concurrency.clamp(1, MAX_CONCURRENCY));
            if count >= 2 {
                return Self {
                    ranges: plan(size, count),
                    ranged: true,
                };
            }
        }

        let whole = info.total_size.map_or_else(ByteRange::empty, |size| {
            ByteRange::new(0, size)
        });
        Self {
            ranges: vec![whole],
            ranged: false,
        }
    }

    fn specs(&self, total_size: Option<u64>) -> Vec<SegmentSpec> {
        if self.ranged {
            self.ranges
                .iter()
                .enumerate()
                .map(|(index, range)| SegmentSpec::ranged(index, *range))
                .collect()
        } else {
            vec![SegmentSpec::whole(total_size)]
        }
    }
}

/// Successful result of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Destination file.
    pub path: PathBuf,
    /// Bytes written to the destination.
    pub bytes_written: u64,
    /// Probed size, when the server reported one.
    pub total_size: Option<u64>,
    /// Whether the multi-segment path was used.
    pub ranged: bool,
    /// Final state of every segment.
    pub segments: Vec<Segment>,
}

/// Starts segmented downloads.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use rangedl::download::{DownloadConfig, Downloader, FsOpener, ReqwestTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DownloadConfig { max_concurrency: 8, ..DownloadConfig::default() };
/// let downloader = Downloader::new(
///     Arc::new(ReqwestTransport::new()),
///     Arc::new(FsOpener),
///     config,
/// )?;
/// let handle = downloader.start("https://example.com/big.iso")?;
/// let outcome = handle.await_result().await?;
/// println!("{} bytes to {}", outcome.bytes_written, outcome.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    opener: Arc<dyn FileOpener>,
    config: DownloadConfig,
}

impl Downloader {
    /// Creates a downloader with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidConfig`] if `config` is out of bounds.
    #[instrument(level = "debug", skip(transport, opener))]
    pub fn new(
        transport: Arc<dyn Transport>,
        opener: Arc<dyn FileOpener>,
        config: DownloadConfig,
    ) -> Result<Self, DownloadError> {
        config.validate()?;
        debug!(
            max_concurrency = config.max_concurrency,
            buffer_size = config.buffer_size,
            "creating downloader"
        );
        Ok(Self {
            transport,
            opener,
            config,
        })
    }

    /// Creates a downloader using [`ReqwestTransport`] and [`FsOpener`].
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidConfig`] if `config` is out of bounds.
    pub fn http(config: DownloadConfig) -> Result<Self, DownloadError> {
        Self::new(Arc::new(ReqwestTransport::new()), Arc::new(FsOpener), config)
    }

    /// Starts downloading `url` in a background task.
    ///
    /// The destination is `output_dir` joined with the final path segment of
    /// the URL. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if `url` is not an absolute
    /// http(s) URL. All other failures are reported by
    /// [`DownloadHandle::await_result`].
    #[instrument(skip_all, fields(url = %url))]
    pub fn start(&self, url: &str) -> Result<DownloadHandle, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }

        let path = self.config.output_dir.join(filename_from_url(&parsed));
        let (state_tx, state_rx) = watch::channel(DownloadState::Created);
        let progress = Arc::new(Progress::new());
        let cancel = CancellationToken::new();

        let run = Run {
            transport: Arc::clone(&self.transport),
            opener: Arc::clone(&self.opener),
            config: self.config.clone(),
            url: parsed,
            path: path.clone(),
            state: state_tx,
            progress: Arc::clone(&progress),
            cancel: cancel.clone(),
        };
        info!(path = %path.display(), "download started");
        let task = tokio::spawn(run.execute());

        Ok(DownloadHandle {
            url: url.to_string(),
            path,
            state: state_rx,
            progress,
            cancel,
            task,
        })
    }

    /// Starts `url` and waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`DownloadError`] of the download.
    pub async fn download(&self, url: &str) -> Result<DownloadOutcome, DownloadError> {
        self.start(url)?.await_result().await
    }
}

/// A running download.
///
/// Dropping the handle does not stop the download; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct DownloadHandle {
    url: String,
    path: PathBuf,
    state: watch::Receiver<DownloadState>,
    progress: Arc<Progress>,
    cancel: CancellationToken,
    task: JoinHandle<Result<DownloadOutcome, DownloadError>>,
}

impl DownloadHandle {
    /// URL being downloaded.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    /// A receiver that is notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.clone()
    }

    /// Byte counters for progress reporting.
    #[must_use]
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Requests cancellation. In-flight segments stop reading and the
    /// outcome becomes [`DownloadError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the download to finish.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`DownloadError`], or
    /// [`DownloadError::TaskFailed`] if the coordinating task panicked.
    pub async fn await_result(self) -> Result<DownloadOutcome, DownloadError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(DownloadError::cancelled(self.url)),
            Err(e) => Err(DownloadError::task_failed(self.url, e.to_string())),
        }
    }
}

/// Everything the coordinating task owns.
struct Run {
    transport: Arc<dyn Transport>,
    opener: Arc<dyn FileOpener>,
    config: DownloadConfig,
    url: Url,
    path: PathBuf,
    state: watch::Sender<DownloadState>,
    progress: Arc<Progress>,
    cancel: CancellationToken,
}

impl Run {
    #[instrument(name = "download", skip(self), fields(url = %self.url))]
    async fn execute(self) -> Result<DownloadOutcome, DownloadError> {
        let result = self.drive().await;
        match &result {
            Ok(outcome) => {
                self.set_state(DownloadState::Completed);
                info!(
                    path = %outcome.path.display(),
                    bytes = outcome.bytes_written,
                    segments = outcome.segments.len(),
                    "download complete"
                );
            }
            Err(e) => {
                self.set_state(DownloadState::Failed);
                warn!(error = %e, path = %self.path.display(), "download failed");
            }
        }
        result
    }

    fn set_state(&self, state: DownloadState) {
        debug!(?state, "state transition");
        self.state.send_replace(state);
    }

    async fn drive(&self) -> Result<DownloadOutcome, DownloadError> {
        let url = self.url.as_str();

        self.set_state(DownloadState::Probing);
        let info = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            info = probe(self.transport.as_ref(), &self.url) => info?,
        };
        self.progress.set_total(info.total_size);

        self.set_state(DownloadState::Planning);
        let plan = DownloadPlan::for_resource(&info, &self.config);
        info!(
            total_size = ?info.total_size,
            ranges_supported = info.ranges_supported,
            segments = plan.ranges.len(),
            ranged = plan.ranged,
            "download planned"
        );

        // Opening before any GET means an unwritable destination costs no
        // body transfer.
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            opened = Writer::open(
                self.opener.as_ref(),
                &self.path,
                info.total_size,
                Arc::clone(&self.progress),
            ) => opened?,
        };
        let writer = Arc::new(opened);

        self.set_state(DownloadState::Fetching);
        let specs = plan.specs(info.total_size);
        let mut segments: Vec<Segment> = specs
            .iter()
            .map(|spec| Segment {
                index: spec.index,
                range: spec.range,
                state: SegmentState::Pending,
                received: 0,
            })
            .collect();

        if let Err(error) = self.fetch_all(&specs, &mut segments, &writer).await {
            writer.close().await;
            return Err(error);
        }

        if self.cancel.is_cancelled() {
            writer.close().await;
            return Err(DownloadError::cancelled(url));
        }

        self.set_state(DownloadState::Assembling);
        let bytes_written = writer.finalize().await?;
        if let Some(total) = info.total_size
            && bytes_written != total
        {
            return Err(DownloadError::integrity(&self.path, total, bytes_written));
        }

        Ok(DownloadOutcome {
            path: self.path.clone(),
            bytes_written,
            total_size: info.total_size,
            ranged: plan.ranged,
            segments,
        })
    }

    /// Runs one fetch task per segment and waits for all of them.
    ///
    /// Returns the first fatal error after cancelling and draining the
    /// remaining tasks, so no write can land after this returns.
    async fn fetch_all(
        &self,
        specs: &[SegmentSpec],
        segments: &mut [Segment],
        writer: &Arc<Writer>,
    ) -> Result<(), DownloadError> {
        let fetch_cancel = self.cancel.child_token();
        let fetcher = SegmentFetcher::new(
            Arc::clone(&self.transport),
            self.url.clone(),
            self.config.buffer_size,
        )
        .with_cancellation(fetch_cancel.clone());

        let mut tasks = JoinSet::new();
        for spec in specs.iter().copied() {
            segments[spec.index].state = SegmentState::InFlight;
            let fetcher = fetcher.clone();
            let writer = Arc::clone(writer);
            tasks.spawn(async move { (spec.index, fetcher.fetch(spec, &*writer).await) });
        }

        let mut first_error = None;
        loop {
            let joined = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    first_error = Some(DownloadError::cancelled(self.url.as_str()));
                    break;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((index, Ok(received))) => {
                    segments[index].state = SegmentState::Completed;
                    segments[index].received = received;
                    debug!(segment = index, received, "segment finished");
                }
                Ok((index, Err(error))) => {
                    segments[index].state = SegmentState::Failed;
                    warn!(segment = index, error = %error, "segment failed, cancelling the rest");
                    first_error = Some(error);
                    break;
                }
                Err(e) => {
                    first_error = Some(DownloadError::task_failed(
                        self.url.as_str(),
                        e.to_string(),
                    ));
                    break;
                }
            }
        }

        let Some(error) = first_error else {
            return Ok(());
        };

        fetch_cancel.cancel();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        for segment in segments
            .iter_mut()
            .filter(|s| s.state == SegmentState::InFlight)
        {
            segment.state = SegmentState::Failed;
        }
        Err(error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::error::ErrorKind;

    fn info(total_size: Option<u64>, ranges_supported: bool) -> ResourceInfo {
        ResourceInfo {
            total_size,
            ranges_supported,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = DownloadConfig::default();
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.buffer_size, 4096);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_rejects_out_of_range_concurrency() {
        for max_concurrency in [0, MAX_CONCURRENCY + 1] {
            let config = DownloadConfig {
                max_concurrency,
                ..DownloadConfig::default()
            };
            assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);
        }
    }

    #[test]
    fn test_config_rejects_zero_buffer() {
        let config = DownloadConfig {
            buffer_size: 0,
            ..DownloadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plan_uses_max_concurrency_segments() {
        let config = DownloadConfig {
            max_concurrency: 4,
            ..DownloadConfig::default()
        };
        let plan = DownloadPlan::for_resource(&info(Some(1000), true), &config);
        assert!(plan.ranged);
        assert_eq!(plan.ranges.len(), 4);
        assert_eq!(plan.ranges.iter().map(ByteRange::len).sum::<u64>(), 1000);
    }

    #[test]
    fn test_plan_falls_back_without_range_support() {
        let plan = DownloadPlan::for_resource(&info(Some(1000), false), &DownloadConfig::default());
        assert!(!plan.ranged);
        assert_eq!(plan.ranges, vec![ByteRange::new(0, 1000)]);
    }

    #[test]
    fn test_plan_falls_back_without_size() {
        let plan = DownloadPlan::for_resource(&info(None, true), &DownloadConfig::default());
        assert!(!plan.ranged);
        assert_eq!(plan.ranges, vec![ByteRange::empty()]);
    }

    #[test]
    fn test_plan_small_resource_limits_segment_count() {
        let config = DownloadConfig {
            max_concurrency: 16,
            min_segment_size: 100,
            ..DownloadConfig::default()
        };
        let plan = DownloadPlan::for_resource(&info(Some(350), true), &config);
        assert_eq!(plan.ranges.len(), 3);

        let plan = DownloadPlan::for_resource(&info(Some(150), true), &config);
        assert!(!plan.ranged);
    }

    #[test]
    fn test_plan_empty_resource_is_single_stream() {
        let plan = DownloadPlan::for_resource(&info(Some(0), true), &DownloadConfig::default());
        assert!(!plan.ranged);
        assert_eq!(plan.ranges, vec![ByteRange::empty()]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(DownloadState::Completed.is_terminal());
        assert!(DownloadState::Failed.is_terminal());
        assert!(!DownloadState::Fetching.is_terminal());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_url() {
        let downloader = Downloader::http(DownloadConfig::default()).unwrap();
        let error = downloader.start("not a url").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidUrl);

        let error = downloader.start("ftp://example.com/file").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidUrl);
    }
}
