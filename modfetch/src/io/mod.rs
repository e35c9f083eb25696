//! Stream plumbing shared by both downloaders.
//!
//! - [`IdleTimeoutReader`] fails a read that receives no bytes within the idle window
//! - [`ProgressReader`] / [`ProgressWriter`] report cumulative byte counts
//! - [`copy_stream`] copies a body to disk, optionally hashing in the same pass
//!
//! ```text
//! response body ─► IdleTimeoutReader ─► ProgressReader ─► copy_stream ─► file
//!                                                            │
//!                                                            └─► StreamHasher
//! ```

mod idle;
mod progress;

pub use idle::{IdleTimeoutReader, StallError};
pub use progress::{ProgressObserver, ProgressReader, ProgressWriter};

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, DownloadResult};
use crate::hash::StreamHasher;

/// Where the bytes of a stream come from, for error attribution.
#[derive(Debug, Clone, Copy)]
pub enum StreamOrigin<'a> {
    /// An HTTP response body.
    Remote(&'a str),
    /// A file on disk.
    File(&'a Path),
}

impl StreamOrigin<'_> {
    /// Translate a read failure into a download error.
    ///
    /// Stalls keep their own variant so the retry layer can tell them apart
    /// from caller cancellation.
    pub fn read_error(&self, err: io::Error) -> DownloadError {
        if let Some(stall) = StallError::from_io(&err) {
            return DownloadError::Stalled {
                timeout: stall.timeout(),
            };
        }
        match self {
            StreamOrigin::Remote(url) => DownloadError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            },
            StreamOrigin::File(path) => DownloadError::io(*path, err),
        }
    }
}

/// Copy `reader` into `writer` until EOF.
///
/// Each read is raced against `cancel`; cancellation wins ties. When a
/// hasher is supplied every chunk is fed to it before being written, so the
/// source is only read once. Returns the number of bytes copied.
pub async fn copy_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    origin: StreamOrigin<'_>,
    dest: &Path,
    buffer_size: usize,
    mut hasher: Option<&mut StreamHasher>,
    cancel: &CancellationToken,
) -> DownloadResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut copied = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            read = reader.read(&mut buffer) => read,
        };
        let n = read.map_err(|e| origin.read_error(e))?;
        if n == 0 {
            break;
        }

        if let Some(h) = hasher.as_deref_mut() {
            h.update(&buffer[..n]);
        }
        writer
            .write_all(&buffer[..n])
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        copied += n as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(dest, e))?;
    Ok(copied)
}
