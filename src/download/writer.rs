//! Destination writer: assembles offset-tagged chunks into one file.
//!
//! The writer is the only owner of the destination handle. Fetchers hand it
//! [`Chunk`]s through the [`ChunkSink`] trait; each chunk is written at its
//! absolute offset, so segments may complete in any order. The seek and the
//! write of one chunk happen under a single lock, which keeps concurrent
//! segments from interleaving system calls on the shared handle.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

use super::error::DownloadError;
use super::progress::Progress;

/// A run of bytes read by one segment, tagged with its file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Index of the segment that produced the chunk.
    pub segment: usize,
    /// Absolute file offset of `data[0]`.
    pub offset: u64,
    /// The bytes themselves.
    pub data: Bytes,
}

/// Consumer side of the fetcher/writer contract.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Accepts one chunk. An error is fatal to the download.
    async fn write(&self, chunk: Chunk) -> Result<(), DownloadError>;
}

/// A writable, seekable destination handle.
pub trait DestinationFile: AsyncWrite + AsyncSeek + Unpin + Send {}

impl<T> DestinationFile for T where T: AsyncWrite + AsyncSeek + Unpin + Send {}

/// Opens destination files.
///
/// Injected into the [`Downloader`](super::Downloader) so tests can redirect
/// output or simulate failing storage.
#[async_trait]
pub trait FileOpener: Send + Sync + fmt::Debug {
    /// Opens (creating if absent) the file at `path` for writing.
    ///
    /// `size_hint` is the final size when known; implementations may use it
    /// to pre-allocate.
    async fn open(
        &self,
        path: &Path,
        size_hint: Option<u64>,
    ) -> io::Result<Box<dyn DestinationFile>>;
}

/// [`FileOpener`] for the local file system.
///
/// Creates missing parent directories, truncates any existing file and
/// pre-sizes it when the final length is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsOpener;

#[async_trait]
impl FileOpener for FsOpener {
    async fn open(
        &self,
        path: &Path,
        size_hint: Option<u64>,
    ) -> io::Result<Box<dyn DestinationFile>> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        if let Some(size) = size_hint {
            file.set_len(size).await?;
        }
        Ok(Box::new(file))
    }
}

struct WriterState {
    file: Option<Box<dyn DestinationFile>>,
    written: u64,
    finalized: bool,
}

/// Positional writer for one download's destination file.
pub struct Writer {
    path: PathBuf,
    size_limit: Option<u64>,
    progress: Arc<Progress>,
    state: Mutex<WriterState>,
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("path", &self.path)
            .field("size_limit", &self.size_limit)
            .finish_non_exhaustive()
    }
}

impl Writer {
    /// Opens the destination once, before any chunk is accepted.
    ///
    /// When `total_size` is known the file is pre-sized and chunks reaching
    /// past it are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Write`] if the opener fails.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(
        opener: &dyn FileOpener,
        path: &Path,
        total_size: Option<u64>,
        progress: Arc<Progress>,
    ) -> Result<Self, DownloadError> {
        let file = opener
            .open(path, total_size)
            .await
            .map_err(|e| DownloadError::write(path, e))?;
        debug!("destination opened");

        Ok(Self {
            path: path.to_path_buf(),
            size_limit: total_size,
            progress,
            state: Mutex::new(WriterState {
                file: Some(file),
                written: 0,
                finalized: false,
            }),
        })
    }

    /// Destination path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `chunk` at its offset.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Write`] when the writer is closed, the chunk
    /// reaches past the known file size, or the underlying IO fails.
    pub async fn write_chunk(&self, chunk: Chunk) -> Result<(), DownloadError> {
        let len = chunk.data.len() as u64;
        if let Some(limit) = self.size_limit
            && chunk.offset.checked_add(len).is_none_or(|end| end > limit)
        {
            return Err(DownloadError::write(
                &self.path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "chunk of {len} bytes at offset {} reaches past end of file ({limit} bytes)",
                        chunk.offset
                    ),
                ),
            ));
        }

        let mut state = self.state.lock().await;
        let Some(file) = state.file.as_mut() else {
            return Err(DownloadError::write(&self.path, closed_error()));
        };

        file.seek(SeekFrom::Start(chunk.offset))
            .await
            .map_err(|e| DownloadError::write(&self.path, e))?;
        file.write_all(&chunk.data)
            .await
            .map_err(|e| DownloadError::write(&self.path, e))?;

        state.written += len;
        self.progress.record(len);
        trace!(segment = chunk.segment, offset = chunk.offset, bytes = len, "chunk written");
        Ok(())
    }

    /// Flushes and closes the file, returning the total bytes written.
    ///
    /// Calling it again after a successful finalize returns the same total.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Write`] if flushing fails or the writer was
    /// closed by [`close`](Self::close). The handle is released either way.
    pub async fn finalize(&self) -> Result<u64, DownloadError> {
        let mut state = self.state.lock().await;
        if state.finalized {
            return Ok(state.written);
        }
        let Some(mut file) = state.file.take() else {
            return Err(DownloadError::write(&self.path, closed_error()));
        };

        let flushed = file.flush().await;
        let shut = file.shutdown().await;
        drop(file);
        flushed
            .and(shut)
            .map_err(|e| DownloadError::write(&self.path, e))?;

        state.finalized = true;
        debug!(path = %self.path.display(), bytes = state.written, "destination finalized");
        Ok(state.written)
    }

    /// Releases the handle on a failure path. Later writes are rejected.
    ///
    /// Does nothing if the writer was already finalized or closed.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut file) = state.file.take() {
            if let Err(e) = file.flush().await {
                warn!(path = %self.path.display(), error = %e, "flush failed while closing destination");
            }
            debug!(path = %self.path.display(), bytes = state.written, "destination closed after failure");
        }
    }
}

#[async_trait]
impl ChunkSink for Writer {
    async fn write(&self, chunk: Chunk) -> Result<(), DownloadError> {
        self.write_chunk(chunk).await
    }
}

fn closed_error() -> io::Error {
    io::Error::other("destination writer is closed")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::error::ErrorKind;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct FailingOpener;

    #[async_trait]
    impl FileOpener for FailingOpener {
        async fn open(
            &self,
            _path: &Path,
            _size_hint: Option<u64>,
        ) -> io::Result<Box<dyn DestinationFile>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"))
        }
    }

    fn chunk(segment: usize, offset: u64, data: &'static [u8]) -> Chunk {
        Chunk {
            segment,
            offset,
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_assemble_correctly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let progress = Arc::new(Progress::new());
        let writer = Writer::open(&FsOpener, &path, Some(12), Arc::clone(&progress))
            .await
            .unwrap();

        writer.write_chunk(chunk(2, 8, b"IJKL")).await.unwrap();
        writer.write_chunk(chunk(0, 0, b"ABCD")).await.unwrap();
        writer.write_chunk(chunk(1, 4, b"EFGH")).await.unwrap();

        assert_eq!(writer.finalize().await.unwrap(), 12);
        assert_eq!(progress.bytes_written(), 12);
        assert_eq!(std::fs::read(&path).unwrap(), b"ABCDEFGHIJKL");
    }

    #[tokio::test]
    async fn test_open_presizes_known_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sized.bin");
        let writer = Writer::open(&FsOpener, &path, Some(1024), Arc::new(Progress::new()))
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
        writer.close().await;
    }

    #[tokio::test]
    async fn test_open_failure_is_write_error() {
        let error = Writer::open(
            &FailingOpener,
            Path::new("/nowhere/file.bin"),
            None,
            Arc::new(Progress::new()),
        )
        .await
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Write);
        assert!(error.to_string().contains("/nowhere/file.bin"));
    }

    #[tokio::test]
    async fn test_chunk_past_known_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.bin");
        let progress = Arc::new(Progress::new());
        let writer = Writer::open(&FsOpener, &path, Some(4), Arc::clone(&progress))
            .await
            .unwrap();

        let error = writer.write_chunk(chunk(0, 2, b"XYZ")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Write);
        assert_eq!(progress.bytes_written(), 0);
        writer.close().await;
    }

    #[tokio::test]
    async fn test_writes_after_close_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("closed.bin");
        let writer = Writer::open(&FsOpener, &path, None, Arc::new(Progress::new()))
            .await
            .unwrap();

        writer.close().await;
        writer.close().await;
        assert!(writer.write_chunk(chunk(0, 0, b"late")).await.is_err());
        assert!(writer.finalize().await.is_err());
    }

    #[tokio::test]
    async fn test_finalize_closes_exactly_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("once.bin");
        let writer = Writer::open(&FsOpener, &path, None, Arc::new(Progress::new()))
            .await
            .unwrap();
        writer.write_chunk(chunk(0, 0, b"data")).await.unwrap();

        assert_eq!(writer.finalize().await.unwrap(), 4);
        assert_eq!(writer.finalize().await.unwrap(), 4);
        writer.close().await;
        assert_eq!(writer.finalize().await.unwrap(), 4);
        assert!(writer.write_chunk(chunk(0, 4, b"more")).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }
}
