//! Idle-timeout detection for response bodies.
//!
//! Servers occasionally stop sending bytes without closing the connection.
//! A whole-request timeout cannot catch that on large files without also
//! killing slow but healthy transfers, so instead every individual read gets
//! its own timer which is re-armed whenever a new read starts.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Payload of the `io::Error` returned when a read stalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallError {
    timeout: Duration,
}

impl StallError {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wrap into an `io::Error` of kind `TimedOut`.
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, self)
    }

    /// Recover the stall payload from an `io::Error`, if it carries one.
    pub fn from_io(err: &io::Error) -> Option<&StallError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<StallError>())
    }
}

impl fmt::Display for StallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No data received for {} seconds",
            self.timeout.as_secs_f64()
        )
    }
}

impl std::error::Error for StallError {}

/// Reader decorator that fails a read when no bytes arrive within `timeout`.
///
/// The timer of a read keeps running until that read completes. A read
/// future dropped while pending (for example the losing branch of a
/// `select!`) leaves it running; call [`IdleTimeoutReader::reset`] before
/// reading again.
///
/// Must be created inside a Tokio runtime.
pub struct IdleTimeoutReader<R> {
    inner: R,
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
    /// Whether a read is in progress and the timer is running for it.
    armed: bool,
}

impl<R> IdleTimeoutReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            sleep: Box::pin(tokio::time::sleep(timeout)),
            armed: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Forget the timer of an abandoned read; the next read starts a fresh window.
    pub fn reset(&mut self) {
        self.armed = false;
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for IdleTimeoutReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.armed {
            this.sleep.as_mut().reset(Instant::now() + this.timeout);
            this.armed = true;
        }

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.armed = false;
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.sleep.as_mut().poll(cx).is_ready() {
                    this.armed = false;
                    tracing::debug!(
                        timeout_secs = this.timeout.as_secs_f64(),
                        "Read stalled, no data received"
                    );
                    return Poll::Ready(Err(StallError::new(this.timeout).into_io()));
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DownloadError;
    use crate::io::{copy_stream, StreamOrigin};
    use bytes::Bytes;
    use futures::stream;
    use std::path::Path;
    use tokio::io::AsyncReadExt;
    use tokio_util::io::StreamReader;
    use tokio_util::sync::CancellationToken;

    /// A body that yields each chunk after sleeping for its paired delay (secs).
    fn paced_body(
        chunks: &[(u64, &'static str)],
    ) -> StreamReader<impl futures::Stream<Item = io::Result<Bytes>> + Unpin, Bytes> {
        let chunks: Vec<(Duration, Bytes)> = chunks
            .iter()
            .map(|&(secs, data)| (Duration::from_secs(secs), Bytes::from_static(data.as_bytes())))
            .collect();
        let stream = stream::unfold(chunks.into_iter(), |mut chunks| async move {
            let (delay, data) = chunks.next()?;
            tokio::time::sleep(delay).await;
            Some((Ok(data), chunks))
        });
        StreamReader::new(Box::pin(stream))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_longer_than_timeout_stalls() {
        let body = paced_body(&[(0, "abcd"), (6, "efg"), (0, "hij")]);
        let mut reader = IdleTimeoutReader::new(body, Duration::from_secs(5));

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");

        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        let stall = StallError::from_io(&err).expect("stall payload");
        assert_eq!(stall.timeout(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_resets_between_reads() {
        // Total transfer takes 12s but no single gap reaches the 5s window.
        let body = paced_body(&[(4, "abcd"), (4, "efg"), (4, "hij")]);
        let mut reader = IdleTimeoutReader::new(body, Duration::from_secs(5));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcdefghij");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_does_not_count_as_stall() {
        let body = paced_body(&[(0, "ab"), (0, "cd")]);
        let mut reader = IdleTimeoutReader::new(body, Duration::from_secs(5));

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        // The consumer is busy for longer than the window between reads.
        tokio::time::sleep(Duration::from_secs(30)).await;
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"cd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_abandoned_read() {
        let body = paced_body(&[(0, "ab"), (8, "cd")]);
        let mut reader = IdleTimeoutReader::new(body, Duration::from_secs(5));

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        let abandoned = tokio::time::timeout(Duration::from_secs(3), reader.read(&mut buf)).await;
        assert!(abandoned.is_err());

        // Past the abandoned read's window, but the next read has its own.
        tokio::time::sleep(Duration::from_secs(4)).await;
        reader.reset();
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"cd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_distinct_from_stall() {
        let body = paced_body(&[(0, "abcd"), (6, "efg")]);
        let mut reader = IdleTimeoutReader::new(body, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let mut sink = tokio::io::sink();
        let result = copy_stream(
            &mut reader,
            &mut sink,
            StreamOrigin::Remote("http://cdn/part"),
            Path::new("<sink>"),
            64,
            None,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_maps_to_stalled_error() {
        let body = paced_body(&[(0, "abcd"), (6, "efg")]);
        let mut reader = IdleTimeoutReader::new(body, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let mut sink = tokio::io::sink();

        let result = copy_stream(
            &mut reader,
            &mut sink,
            StreamOrigin::Remote("http://cdn/part"),
            Path::new("<sink>"),
            64,
            None,
            &cancel,
        )
        .await;
        match result {
            Err(DownloadError::Stalled { timeout }) => {
                assert_eq!(timeout, Duration::from_secs(5))
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }
}
