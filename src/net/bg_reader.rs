use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::io::pool::{self, PoolBuf};

// Chunks match the chunked reader's refill size so a full drain hands over
// in the same units the framing layer consumes.
const DRAIN_CHUNK: usize = 8192;

/// Lifecycle of the opportunistic read-side drain.
///
/// `start`/`stop` requests race against the drain observing them: a `stop`
/// while draining parks the status at `Stopping` until the drain (or the
/// main read path reclaiming the socket) settles it back to `Stopped`, and
/// a `start` arriving in that window simply cancels the pending stop.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BgStatus {
    Stopped,
    Running,
    Stopping,
}

/// What a drain attempt accomplished.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Drained {
    /// At least one chunk was read off the socket.
    Progress,

    /// No further read progress is possible: the reader is stopped, hit
    /// end-of-stream, or latched an error.
    Idle,
}

/// Buffers bytes read off the socket while a flush is blocked on the write
/// side, so the peer can always make progress draining its own send
/// buffer.
///
/// The drained bytes are served back to the next reader in FIFO order,
/// honoring partial reads; a read error is latched and handed to the next
/// reader once the buffered data is consumed.
pub(crate) struct BackgroundReader {
    status: BgStatus,
    chunks: VecDeque<Chunk>,
    err: Option<io::Error>,
    eof: bool,
}

struct Chunk {
    buf: PoolBuf,
    pos: usize,
}

impl BackgroundReader {
    pub fn new() -> Self {
        Self {
            status: BgStatus::Stopped,
            chunks: VecDeque::new(),
            err: None,
            eof: false,
        }
    }

    pub fn status(&self) -> BgStatus {
        self.status
    }

    pub fn start(&mut self) {
        match self.status {
            // cancel a pending stop, or begin anew
            BgStatus::Stopped | BgStatus::Stopping => self.status = BgStatus::Running,
            BgStatus::Running => {}
        }
    }

    pub fn stop(&mut self) {
        if self.status == BgStatus::Running {
            self.status = BgStatus::Stopping;
        }
    }

    /// The main read path is reclaiming the socket; any pending stop (or
    /// run) resolves to `Stopped` because the two readers never overlap.
    pub fn settle(&mut self) {
        self.status = BgStatus::Stopped;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes buffered and not yet served.
    pub fn buffered(&self) -> usize {
        self.chunks.iter().map(|c| c.buf.len() - c.pos).sum()
    }

    /// Pull whatever the socket has ready right now into the chunk queue.
    ///
    /// `Poll::Pending` means the socket had nothing and the waker is
    /// registered; the caller should yield with its write interest also
    /// registered.
    pub fn poll_drain<S>(&mut self, cx: &mut Context<'_>, socket: &mut S) -> Poll<Drained>
    where
        S: AsyncRead + Unpin,
    {
        if self.status != BgStatus::Running {
            self.settle();
            return Poll::Ready(Drained::Idle);
        }

        if self.err.is_some() || self.eof {
            self.status = BgStatus::Stopped;
            return Poll::Ready(Drained::Idle);
        }

        let mut progress = false;

        loop {
            let mut buf = pool::get(DRAIN_CHUNK);
            let mut read_buf = ReadBuf::new(&mut buf);

            match Pin::new(&mut *socket).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled().len();

                    if filled == 0 {
                        // peer closed its write side; not an error until a
                        // reader actually runs dry
                        self.eof = true;
                        self.status = BgStatus::Stopped;
                        return Poll::Ready(if progress {
                            Drained::Progress
                        } else {
                            Drained::Idle
                        });
                    }

                    buf.truncate(filled);
                    self.chunks.push_back(Chunk { buf, pos: 0 });
                    progress = true;
                }

                Poll::Ready(Err(e)) => {
                    self.err = Some(e);
                    self.status = BgStatus::Stopped;
                    return Poll::Ready(if progress {
                        Drained::Progress
                    } else {
                        Drained::Idle
                    });
                }

                Poll::Pending => {
                    return if progress {
                        Poll::Ready(Drained::Progress)
                    } else {
                        Poll::Pending
                    };
                }
            }
        }
    }

    /// Serve buffered bytes into `out`, re-queueing any chunk remainder.
    /// Returns the number of bytes copied.
    pub fn pop_into(&mut self, out: &mut ReadBuf<'_>) -> usize {
        let mut copied = 0;

        while out.remaining() > 0 {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };

            let available = &chunk.buf[chunk.pos..];
            let n = available.len().min(out.remaining());

            out.put_slice(&available[..n]);
            chunk.pos += n;
            copied += n;

            if chunk.pos == chunk.buf.len() {
                self.chunks.pop_front();
            }
        }

        copied
    }

    /// The latched read error, if any; taking it resets the latch.
    pub fn take_err(&mut self) -> Option<io::Error> {
        self.err.take()
    }

    pub fn saw_eof(&self) -> bool {
        self.eof
    }
}

#[cfg(test)]
mod tests {
    use super::{BackgroundReader, BgStatus};
    use tokio::io::ReadBuf;

    #[test]
    fn it_transitions_between_states() {
        let mut bg = BackgroundReader::new();
        assert_eq!(bg.status(), BgStatus::Stopped);

        bg.start();
        assert_eq!(bg.status(), BgStatus::Running);

        bg.stop();
        assert_eq!(bg.status(), BgStatus::Stopping);

        // a start during a pending stop cancels the stop
        bg.start();
        assert_eq!(bg.status(), BgStatus::Running);

        bg.stop();
        bg.settle();
        assert_eq!(bg.status(), BgStatus::Stopped);
    }

    #[tokio::test]
    async fn it_drains_and_serves_partial_reads() {
        let (mut a, b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, b"hello world").await.unwrap();
        drop(a);

        let mut bg = BackgroundReader::new();
        bg.start();

        let mut b = b;
        std::future::poll_fn(|cx| bg.poll_drain(cx, &mut b).map(|_| Ok::<_, ()>(())))
            .await
            .unwrap();

        assert_eq!(bg.buffered(), 11);

        let mut first = [0_u8; 5];
        let mut read_buf = ReadBuf::new(&mut first);
        assert_eq!(bg.pop_into(&mut read_buf), 5);
        assert_eq!(&first, b"hello");

        let mut rest = [0_u8; 32];
        let mut read_buf = ReadBuf::new(&mut rest);
        assert_eq!(bg.pop_into(&mut read_buf), 6);
        assert_eq!(&rest[..6], b" world");
        assert!(bg.is_empty());
    }
}
