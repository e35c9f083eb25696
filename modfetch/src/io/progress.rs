//! Byte-count reporting decorators.
//!
//! Both decorators report the running total after every successful
//! non-empty read or write. They never alter the bytes or the errors of the
//! wrapped stream.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Observer invoked with the cumulative number of bytes transferred.
pub type ProgressObserver = Arc<dyn Fn(u64) + Send + Sync>;

/// Reader decorator reporting cumulative bytes read.
pub struct ProgressReader<R> {
    inner: R,
    total: u64,
    observer: ProgressObserver,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, observer: ProgressObserver) -> Self {
        Self {
            inner,
            total: 0,
            observer,
        }
    }

    /// Bytes read so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let n = buf.filled().len() - before;
            if n > 0 {
                this.total += n as u64;
                (this.observer)(this.total);
            }
        }
        result
    }
}

/// Writer decorator reporting cumulative bytes written.
pub struct ProgressWriter<W> {
    inner: W,
    total: u64,
    observer: ProgressObserver,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, observer: ProgressObserver) -> Self {
        Self {
            inner,
            total: 0,
            observer,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = result {
            if n > 0 {
                this.total += n as u64;
                (this.observer)(this.total);
            }
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
