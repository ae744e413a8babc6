//! Throttled stream wrappers
//!
//! A wrapped reader or writer draws byte tokens from its user's
//! bandwidth bucket before letting bytes move, sleeping out the
//! shortfall when the bucket runs dry. Tokens drawn but not used are
//! handed to a process-wide refill pool on drop, and fresh wrappers
//! seed themselves from that pool, which amortises small aligned
//! reads.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use metagate_common::{Error, Result};

use crate::bucket::TokenBucket;

/// Most bytes moved per token acquisition.
const MAX_CHUNK: u64 = 64 * 1024;

/// Spare byte tokens shared by every throttled stream of the
/// process.
#[derive(Debug)]
pub struct RefillPool {
    spare: Mutex<u64>,
    /// Most tokens the pool holds; beyond this, returns are dropped.
    capacity: u64,
    /// Most tokens one new stream may seed itself with.
    buffer: u64,
}

impl RefillPool {
    #[must_use]
    pub fn new(capacity: u64, buffer: u64) -> Self {
        Self {
            spare: Mutex::new(0),
            capacity,
            buffer: buffer.min(capacity),
        }
    }

    /// Draws up to the per-stream buffer.
    fn draw(&self) -> u64 {
        let mut spare = self.spare.lock();
        let taken = (*spare).min(self.buffer);
        *spare -= taken;
        taken
    }

    fn put(&self, tokens: u64) {
        let mut spare = self.spare.lock();
        *spare = (*spare + tokens).min(self.capacity);
    }

    #[must_use]
    pub fn spare(&self) -> u64 {
        *self.spare.lock()
    }
}

/// Shared throttling state of one stream.
struct Throttle {
    bucket: Arc<TokenBucket>,
    pool: Arc<RefillPool>,
    /// Tokens acquired but not yet spent on bytes
    reserved: u64,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Throttle {
    fn new(bucket: Arc<TokenBucket>, pool: Arc<RefillPool>) -> Result<Self> {
        // A limit smaller than one chunk can never satisfy an
        // acquisition and would park the stream forever.
        if bucket.capacity() < MAX_CHUNK {
            return Err(Error::QosMisconfigured(format!(
                "bandwidth burst {} below chunk size {MAX_CHUNK}",
                bucket.capacity()
            )));
        }
        let reserved = pool.draw();
        Ok(Self {
            bucket,
            pool,
            reserved,
            sleep: None,
        })
    }

    /// Clears a pending backoff, acquires tokens for `want` bytes,
    /// or parks the task until the bucket refills. Returns the
    /// number of bytes the caller may move.
    fn poll_acquire(&mut self, cx: &mut Context<'_>, want: u64) -> Poll<u64> {
        loop {
            if let Some(sleep) = &mut self.sleep {
                ready!(sleep.as_mut().poll(cx));
                self.sleep = None;
            }
            let want = want.min(MAX_CHUNK);
            if self.reserved >= want {
                return Poll::Ready(want);
            }
            match self.bucket.try_acquire(want - self.reserved) {
                Ok(()) => {
                    self.reserved = want;
                    return Poll::Ready(want);
                }
                Err(retry_after) => {
                    self.sleep = Some(Box::pin(tokio::time::sleep(retry_after)));
                }
            }
        }
    }

    /// Books `used` bytes against the reservation.
    fn consume(&mut self, used: u64) {
        self.reserved = self.reserved.saturating_sub(used);
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        self.pool.put(self.reserved);
    }
}

/// [`AsyncRead`] adapter enforcing a byte-per-second budget.
pub struct ThrottledReader<R> {
    inner: R,
    throttle: Throttle,
}

impl<R> ThrottledReader<R> {
    pub fn new(inner: R, bucket: Arc<TokenBucket>, pool: Arc<RefillPool>) -> Result<Self> {
        Ok(Self {
            inner,
            throttle: Throttle::new(bucket, pool)?,
        })
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let want = buf.remaining() as u64;
        if want == 0 {
            return Poll::Ready(Ok(()));
        }
        let allowed = ready!(this.throttle.poll_acquire(cx, want));

        let limit = usize::try_from(allowed).unwrap_or(usize::MAX);
        let mut limited = buf.take(limit);
        let result = ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited));
        let read = limited.filled().len();
        // Mirror the inner read's progress into the caller's buffer.
        // The first `read` bytes were initialized through `limited`,
        // which borrows the same allocation.
        #[allow(unsafe_code)]
        unsafe {
            buf.assume_init(read);
        }
        buf.advance(read);
        this.throttle.consume(read as u64);
        Poll::Ready(result)
    }
}

/// [`AsyncWrite`] adapter enforcing a byte-per-second budget.
pub struct ThrottledWriter<W> {
    inner: W,
    throttle: Throttle,
}

impl<W> ThrottledWriter<W> {
    pub fn new(inner: W, bucket: Arc<TokenBucket>, pool: Arc<RefillPool>) -> Result<Self> {
        Ok(Self {
            inner,
            throttle: Throttle::new(bucket, pool)?,
        })
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ThrottledWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if data.is_empty() {
            return Pin::new(&mut this.inner).poll_write(cx, data);
        }
        let allowed = ready!(this.throttle.poll_acquire(cx, data.len() as u64));
        let limit = usize::try_from(allowed).unwrap_or(usize::MAX).min(data.len());
        let written = ready!(Pin::new(&mut this.inner).poll_write(cx, &data[..limit]))?;
        this.throttle.consume(written as u64);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::Instant;

    fn parts(rate: u64, burst: u64) -> (Arc<TokenBucket>, Arc<RefillPool>) {
        (
            Arc::new(TokenBucket::new(rate, burst)),
            Arc::new(RefillPool::new(1024 * 1024, 256 * 1024)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_paces_transfer() {
        // 128 KiB/s, 64 KiB burst: 256 KiB should need >= 1.5s.
        let (bucket, pool) = parts(128 * 1024, 64 * 1024);
        let data = vec![7u8; 256 * 1024];
        let mut reader =
            ThrottledReader::new(std::io::Cursor::new(data.clone()), bucket, pool).unwrap();

        let started = Instant::now();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert!(started.elapsed() >= Duration::from_millis(1_400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_paces_transfer() {
        let (bucket, pool) = parts(128 * 1024, 64 * 1024);
        let mut writer = ThrottledWriter::new(Vec::new(), bucket, pool).unwrap();

        let started = Instant::now();
        writer.write_all(&vec![7u8; 128 * 1024]).await.unwrap();
        writer.flush().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_misconfigured_limit_fails_fast() {
        let (bucket, pool) = parts(10, 10);
        let result = ThrottledReader::new(std::io::Cursor::new(vec![0u8; 4]), bucket, pool);
        assert!(matches!(result, Err(Error::QosMisconfigured(_))));
    }

    #[tokio::test]
    async fn test_unused_tokens_return_to_pool() {
        let (bucket, pool) = parts(128 * 1024, 128 * 1024);
        {
            let mut reader = ThrottledReader::new(
                std::io::Cursor::new(vec![1u8; 16]),
                bucket.clone(),
                Arc::clone(&pool),
            )
            .unwrap();
            // One short read: 32 tokens acquired, 16 consumed.
            let mut buf = [0u8; 32];
            let n = reader.read(&mut buf).await.unwrap();
            assert_eq!(n, 16);
        }
        assert_eq!(pool.spare(), 16);

        // The next stream seeds itself from the pool.
        let reader =
            ThrottledReader::new(std::io::Cursor::new(Vec::<u8>::new()), bucket, Arc::clone(&pool))
                .unwrap();
        assert_eq!(pool.spare(), 0);
        drop(reader);
        assert_eq!(pool.spare(), 16);
    }
}
