use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;

// Sized to cover the default send buffer of a stock postgres server, so one
// read usually captures a full flush from the backend.
const MIN_READ: usize = 8192;

/// Hands out contiguous runs of exactly `n` bytes from a byte stream,
/// buffering and compacting internally as needed.
///
/// Filling (`fill`) and consuming (`take`) are split so a caller can probe
/// for a complete message without consuming a partial one: if `fill` fails
/// part-way (for example with `WouldBlock` in non-blocking mode), every
/// byte read so far is still buffered and the next call resumes cleanly.
pub struct ChunkedReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MIN_READ),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// The bytes buffered but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Read from the stream until at least `n` bytes are buffered.
    pub async fn fill(&mut self, n: usize) -> Result<(), Error> {
        while self.buf.len() < n {
            // `reserve` re-uses the vacated front of the buffer when it can
            // and reallocates when it cannot; either way we end with room
            // for the remainder plus a minimum read.
            self.buf.reserve((n - self.buf.len()).max(MIN_READ));

            let read = self.inner.read_buf(&mut self.buf).await?;

            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream",
                )
                .into());
            }
        }

        Ok(())
    }

    /// Consume `n` previously filled bytes.
    ///
    /// Panics if fewer than `n` bytes are buffered; call [`fill`] first.
    ///
    /// [`fill`]: Self::fill
    pub fn take(&mut self, n: usize) -> Bytes {
        assert!(self.buf.len() >= n, "take() of more than is buffered");

        self.buf.split_to(n).freeze()
    }

    /// Read and consume exactly `n` bytes.
    pub async fn next(&mut self, n: usize) -> Result<Bytes, Error> {
        self.fill(n).await?;

        Ok(self.take(n))
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkedReader;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    // Serves a fixed transcript in chunks of a given size; used to prove
    // that framing is insensitive to how the stream is split.
    struct SplitReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl AsyncRead for SplitReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let remaining = self.data.len() - self.pos;
            let n = remaining.min(self.chunk).min(buf.remaining());
            let pos = self.pos;

            buf.put_slice(&self.data[pos..pos + n]);
            self.pos += n;

            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn it_reads_exact_runs_across_any_split() {
        let mut data = Vec::new();
        for i in 0..64u32 {
            data.extend_from_slice(&i.to_be_bytes());
        }

        for chunk in [1, 2, 3, 5, 7, 64, 256] {
            let mut reader = ChunkedReader::new(SplitReader {
                data: data.clone(),
                pos: 0,
                chunk,
            });

            for i in 0..64u32 {
                let run = reader.next(4).await.unwrap();
                assert_eq!(run.as_ref(), i.to_be_bytes());
            }
        }
    }

    #[tokio::test]
    async fn it_reports_unexpected_eof() {
        let mut reader = ChunkedReader::new(SplitReader {
            data: b"abc".to_vec(),
            pos: 0,
            chunk: 64,
        });

        let err = reader.next(4).await.unwrap_err();
        assert!(err.to_string().contains("unexpected end of stream"));
    }

    #[tokio::test]
    async fn it_fills_without_consuming() {
        let mut reader = ChunkedReader::new(SplitReader {
            data: b"hello world".to_vec(),
            pos: 0,
            chunk: 2,
        });

        reader.fill(5).await.unwrap();
        assert!(reader.buffered().len() >= 5);

        assert_eq!(reader.take(5).as_ref(), b"hello");
        assert_eq!(reader.next(6).await.unwrap().as_ref(), b" world");
    }
}
