use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{sleep_until, Sleep};

use crate::error::Error;
use crate::io::pool::{self, PoolBuf};
use crate::net::bg_reader::{BackgroundReader, Drained};
use crate::net::{BgStatus, Stream};

/// A per-direction I/O deadline.
///
/// `Nonblocking` is the "do not wait at all" request: reads (or writes)
/// that cannot complete immediately fail with
/// [`io::ErrorKind::WouldBlock`] instead of suspending.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Deadline {
    None,
    At(Instant),
    Nonblocking,
}

struct DeadlineState {
    read: Deadline,
    write: Deadline,

    // Set by the cancellation watcher; equivalent to both deadlines moved
    // into the past, and sticky until the watcher resets it.
    canceled: bool,

    // Bumped on every change so pollers know to re-arm their timers.
    epoch: u64,

    // I/O tasks parked on socket readiness; a deadline change must reach
    // them even though the socket itself has not become ready.
    wakers: Vec<Waker>,
}

/// A shared handle to a stream's deadline state.
///
/// The connection's cancellation watcher holds a clone and uses it to
/// interrupt whatever I/O the stream is blocked on.
#[derive(Clone)]
pub struct DeadlineHandle {
    inner: Arc<Mutex<DeadlineState>>,
}

impl DeadlineHandle {
    fn new() -> Self {
        DeadlineHandle {
            inner: Arc::new(Mutex::new(DeadlineState {
                read: Deadline::None,
                write: Deadline::None,
                canceled: false,
                epoch: 0,
                wakers: Vec::new(),
            })),
        }
    }

    pub fn set_read(&self, deadline: Deadline) {
        self.update(|state| state.read = deadline);
    }

    pub fn set_write(&self, deadline: Deadline) {
        self.update(|state| state.write = deadline);
    }

    /// Interrupt pending and future I/O, as if both deadlines were in the
    /// past. Sticky until [`reset`] is called.
    ///
    /// [`reset`]: Self::reset
    pub fn cancel(&self) {
        self.update(|state| state.canceled = true);
    }

    /// Clear cancellation and both deadlines.
    pub fn reset(&self) {
        self.update(|state| {
            state.canceled = false;
            state.read = Deadline::None;
            state.write = Deadline::None;
        });
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.lock().unwrap().canceled
    }

    fn update(&self, f: impl FnOnce(&mut DeadlineState)) {
        let wakers = {
            let mut state = self.inner.lock().unwrap();
            f(&mut state);
            state.epoch += 1;
            std::mem::take(&mut state.wakers)
        };

        for waker in wakers {
            waker.wake();
        }
    }

    fn snapshot(&self) -> (Deadline, Deadline, bool, u64) {
        let state = self.inner.lock().unwrap();
        (state.read, state.write, state.canceled, state.epoch)
    }

    fn register(&self, waker: &Waker) {
        let mut state = self.inner.lock().unwrap();

        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
    }
}

struct WriteChunk {
    buf: PoolBuf,
    pos: usize,
}

enum DeadlineCheck {
    Wait,
    Nonblocking,
    Expired(io::Error),
}

fn canceled_err() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "operation canceled")
}

fn timeout_err() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
}

fn closed_err() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

fn would_block_err(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::WouldBlock, format!("{what} would block"))
}

/// A connection wrapper that makes the classic two-sided write deadlock
/// impossible.
///
/// Writes are queued in pooled buffers and never touch the socket;
/// [`flush`] drives the queue out, and whenever the kernel send buffer is
/// full it opportunistically drains the read side into a queue of its own.
/// A peer blocked writing to us therefore always makes progress, which in
/// turn unblocks our writes, without the caller ever issuing a read.
///
/// The stream also carries per-direction [`Deadline`]s (including the
/// non-blocking mode used to poll for asynchronous errors mid-`COPY`) and
/// is the interruption point for the connection's cancellation watcher.
///
/// [`flush`]: Self::flush
pub struct NbStream<S> {
    socket: S,

    wqueue: VecDeque<WriteChunk>,
    bg: BackgroundReader,

    deadlines: DeadlineHandle,
    seen_epoch: u64,
    read_sleep: Option<Pin<Box<Sleep>>>,
    write_sleep: Option<Pin<Box<Sleep>>>,

    // whether any byte of the currently queued data reached the socket;
    // drives the `safe_to_retry` hint on write errors
    wrote_since_empty: bool,

    // set when a flush fails on the socket proper, so `flush` can convert
    // the plain io::Error into `Error::Write` with the retry hint attached
    write_err_hint: Option<bool>,

    closed: bool,
}

impl<S: Stream> NbStream<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            wqueue: VecDeque::new(),
            bg: BackgroundReader::new(),
            deadlines: DeadlineHandle::new(),
            seen_epoch: 0,
            read_sleep: None,
            write_sleep: None,
            wrote_since_empty: false,
            write_err_hint: None,
            closed: false,
        }
    }

    /// The shared deadline handle, for the cancellation watcher.
    pub fn deadline_handle(&self) -> DeadlineHandle {
        self.deadlines.clone()
    }

    pub fn set_read_deadline(&mut self, deadline: Deadline) {
        self.deadlines.set_read(deadline);
    }

    pub fn set_write_deadline(&mut self, deadline: Deadline) {
        self.deadlines.set_write(deadline);
    }

    /// Status of the opportunistic read-side drain.
    pub fn bg_status(&self) -> BgStatus {
        self.bg.status()
    }

    /// Bytes queued for write but not yet flushed.
    pub fn write_queued(&self) -> usize {
        self.wqueue.iter().map(|c| c.buf.len() - c.pos).sum()
    }

    /// Append `bytes` to the write queue.
    ///
    /// Never performs I/O and never blocks; the only failure is writing to
    /// a closed stream.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        if bytes.is_empty() {
            return Ok(());
        }

        let mut buf = pool::get(bytes.len());
        buf.copy_from_slice(bytes);

        self.wqueue.push_back(WriteChunk { buf, pos: 0 });

        Ok(())
    }

    /// Drive the write queue out to the socket, draining the read side
    /// whenever the write side has no room.
    pub async fn flush(&mut self) -> Result<(), Error> {
        // a hint latched by an earlier failed flush must not leak into
        // this attempt's error
        self.write_err_hint = None;

        let result = poll_fn(|cx| self.poll_flush_queue(cx)).await;

        result.map_err(|source| match self.write_err_hint.take() {
            Some(safe_to_retry) => Error::Write {
                source,
                safe_to_retry,
            },
            None => self.map_io_err(source),
        })
    }

    /// Read into `buf`: flush first, then serve opportunistically buffered
    /// bytes, then (unless in non-blocking mode) wait on the socket.
    ///
    /// Returns the number of bytes read; zero is end-of-stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.flush().await?;

        let mut read_buf = ReadBuf::new(buf);
        let result = poll_fn(|cx| self.poll_read_inner(cx, &mut read_buf)).await;
        let filled = read_buf.filled().len();

        result.map_err(|source| self.map_io_err(source))?;

        Ok(filled)
    }

    /// Best-effort flush, then shut the stream down. One-shot: later calls
    /// are no-ops and later writes fail.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }

        if let Err(error) = self.flush().await {
            log::debug!("discarding unflushed data on close: {error}");
        }

        self.closed = true;

        let _ = poll_fn(|cx| Pin::new(&mut self.socket).poll_shutdown(cx)).await;

        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refine a bare I/O error into the deadline/cancellation taxonomy.
    pub(crate) fn refine_error(&self, err: Error) -> Error {
        match err {
            Error::Io(source) => self.map_io_err(source),
            other => other,
        }
    }

    fn map_io_err(&self, source: io::Error) -> Error {
        match source.kind() {
            io::ErrorKind::Interrupted if self.deadlines.is_canceled() => Error::Canceled,
            io::ErrorKind::TimedOut => Error::Timeout,
            io::ErrorKind::NotConnected if self.closed => Error::Closed,
            _ => Error::Io(source),
        }
    }

    // Re-arm the deadline timers if the shared state changed since we last
    // looked.
    fn sync_deadlines(&mut self) -> (Deadline, Deadline, bool) {
        let (read, write, canceled, epoch) = self.deadlines.snapshot();

        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;

            self.read_sleep = match read {
                Deadline::At(at) => Some(Box::pin(sleep_until(at.into()))),
                _ => None,
            };

            self.write_sleep = match write {
                Deadline::At(at) => Some(Box::pin(sleep_until(at.into()))),
                _ => None,
            };
        }

        (read, write, canceled)
    }

    fn check_deadline(
        deadline: Deadline,
        sleep: &mut Option<Pin<Box<Sleep>>>,
        canceled: bool,
        cx: &mut Context<'_>,
    ) -> DeadlineCheck {
        if canceled {
            return DeadlineCheck::Expired(canceled_err());
        }

        match deadline {
            Deadline::None => DeadlineCheck::Wait,
            Deadline::Nonblocking => DeadlineCheck::Nonblocking,

            Deadline::At(_) => match sleep {
                Some(timer) => {
                    if timer.as_mut().poll(cx).is_ready() {
                        DeadlineCheck::Expired(timeout_err())
                    } else {
                        DeadlineCheck::Wait
                    }
                }
                None => DeadlineCheck::Wait,
            },
        }
    }

    fn poll_flush_queue(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Err(closed_err()));
        }

        let (_, write_deadline, canceled) = self.sync_deadlines();

        let nonblocking =
            match Self::check_deadline(write_deadline, &mut self.write_sleep, canceled, cx) {
                DeadlineCheck::Expired(e) => return Poll::Ready(Err(e)),
                DeadlineCheck::Nonblocking => true,
                DeadlineCheck::Wait => false,
            };

        loop {
            if self.wqueue.is_empty() {
                break;
            }

            // poll the write in a scope that does not outlive the match,
            // so the queue borrow is released before the blocked-path
            // methods run
            let wrote = {
                let front = &self.wqueue[0];
                Pin::new(&mut self.socket).poll_write(cx, &front.buf[front.pos..])
            };

            let blocked = match wrote {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(self.latch_write_err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "wrote zero bytes to the socket",
                    ))));
                }

                Poll::Ready(Ok(n)) => {
                    let front = &mut self.wqueue[0];
                    front.pos += n;
                    self.wrote_since_empty = true;

                    if front.pos == front.buf.len() {
                        self.wqueue.pop_front();
                    }

                    continue;
                }

                // a raw nonblocking syscall error and poll-level pending
                // are the same condition here
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => true,
                Poll::Pending => true,

                Poll::Ready(Err(e)) => {
                    // the unwritten remainder stays at the queue front
                    return Poll::Ready(Err(self.latch_write_err(e)));
                }
            };

            debug_assert!(blocked);

            if nonblocking {
                return Poll::Ready(Err(would_block_err("write")));
            }

            // The write side has no room. Drain the read side so the peer
            // can always progress; retry the write once that drains
            // something.
            self.bg.start();

            match self.bg.poll_drain(cx, &mut self.socket) {
                Poll::Ready(Drained::Progress) => continue,

                // no read progress possible either; park with both
                // interests registered, plus the deadline change waker
                Poll::Ready(Drained::Idle) | Poll::Pending => {
                    self.deadlines.register(cx.waker());
                    return Poll::Pending;
                }
            }
        }

        // queue fully written; stop the drain and flush through TLS
        self.bg.stop();

        match Pin::new(&mut self.socket).poll_flush(cx) {
            Poll::Ready(Ok(())) => {
                self.wrote_since_empty = false;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.latch_write_err(e))),
            Poll::Pending => {
                self.deadlines.register(cx.waker());
                Poll::Pending
            }
        }
    }

    // Record the retry hint for a fatal write-side error; `flush` picks it
    // up to build `Error::Write`.
    fn latch_write_err(&mut self, source: io::Error) -> io::Error {
        self.write_err_hint = Some(!self.wrote_since_empty);
        source
    }

    pub(crate) fn poll_read_inner(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // opportunistically buffered bytes are served first, honoring
        // partial reads
        if self.bg.pop_into(buf) > 0 {
            return Poll::Ready(Ok(()));
        }

        // then a read error latched by the drain
        if let Some(e) = self.bg.take_err() {
            return Poll::Ready(Err(e));
        }

        if self.bg.saw_eof() {
            return Poll::Ready(Ok(())); // zero bytes filled: end-of-stream
        }

        if self.closed {
            return Poll::Ready(Err(closed_err()));
        }

        let (read_deadline, _, canceled) = self.sync_deadlines();

        let nonblocking =
            match Self::check_deadline(read_deadline, &mut self.read_sleep, canceled, cx) {
                DeadlineCheck::Expired(e) => return Poll::Ready(Err(e)),
                DeadlineCheck::Nonblocking => true,
                DeadlineCheck::Wait => false,
            };

        // the main reader owns the socket from here; a pending drain stop
        // settles
        self.bg.settle();

        match Pin::new(&mut self.socket).poll_read(cx, buf) {
            Poll::Pending if nonblocking => Poll::Ready(Err(would_block_err("read"))),

            Poll::Pending => {
                self.deadlines.register(cx.waker());
                Poll::Pending
            }

            ready => ready,
        }
    }
}

impl<S: Stream> AsyncRead for NbStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().poll_read_inner(cx, buf)
    }
}

impl NbStream<crate::net::PgSocket> {
    /// Upgrade the wrapped socket to TLS.
    ///
    /// Must be called once, before any protocol traffic is queued, and
    /// never concurrently with other operations on the stream.
    pub async fn start_tls(
        &mut self,
        host: &str,
        connector: native_tls::TlsConnector,
    ) -> Result<(), Error> {
        debug_assert!(self.wqueue.is_empty());
        debug_assert!(self.bg.is_empty());

        self.socket.upgrade(host, connector).await
    }

    pub fn is_tls(&self) -> bool {
        self.socket.is_tls()
    }

    /// See [`MaybeTlsStream::tls_server_end_point`].
    ///
    /// [`MaybeTlsStream::tls_server_end_point`]: crate::net::MaybeTlsStream::tls_server_end_point
    pub fn tls_server_end_point(&self) -> Option<Vec<u8>> {
        self.socket.tls_server_end_point()
    }
}

#[cfg(test)]
mod tests {
    use super::{Deadline, NbStream};
    use crate::error::Error;
    use std::io::ErrorKind;
    use std::time::{Duration, Instant};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn write_never_blocks_or_performs_io() {
        let (a, _b) = tokio::io::duplex(16);
        let mut stream = NbStream::new(a);

        // far more than the pipe can hold; must return instantly
        stream.write(&payload(1 << 20)).unwrap();

        assert_eq!(stream.write_queued(), 1 << 20);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn flush_makes_progress_when_both_sides_write_first() {
        // both peers write more than the pipe buffers in either direction
        // before either one reads: without the opportunistic drain, both
        // flushes would block forever
        const LEN: usize = 256 * 1024;

        let (a, b) = tokio::io::duplex(1024);
        let mut a = NbStream::new(a);
        let mut b = NbStream::new(b);

        a.write(&payload(LEN)).unwrap();
        b.write(&payload(LEN)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            let (ra, rb) = tokio::join!(a.flush(), b.flush());
            ra.unwrap();
            rb.unwrap();
        })
        .await
        .expect("deadlocked: flush required the caller to read");

        // and the data survived intact in both directions
        for stream in [&mut a, &mut b] {
            let mut received = vec![0_u8; LEN];
            let mut filled = 0;

            while filled < LEN {
                let n = stream.read(&mut received[filled..]).await.unwrap();
                assert_ne!(n, 0, "unexpected eof");
                filled += n;
            }

            assert_eq!(received, payload(LEN));
        }
    }

    #[tokio::test]
    async fn read_deadline_expires() {
        let (a, _b) = tokio::io::duplex(64);
        let mut stream = NbStream::new(a);

        stream.set_read_deadline(Deadline::At(Instant::now() + Duration::from_millis(20)));

        let mut buf = [0_u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();

        assert!(matches!(err, Error::Timeout), "got: {err:?}");
    }

    #[tokio::test]
    async fn nonblocking_read_returns_would_block() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut stream = NbStream::new(a);

        stream.set_read_deadline(Deadline::Nonblocking);

        let mut buf = [0_u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();

        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::WouldBlock),
            other => panic!("expected WouldBlock, got {other:?}"),
        }

        // once data is available the same mode serves it immediately
        tokio::io::AsyncWriteExt::write_all(&mut b, b"hi").await.unwrap();

        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_read() {
        let (a, _b) = tokio::io::duplex(64);
        let mut stream = NbStream::new(a);
        let handle = stream.deadline_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let mut buf = [0_u8; 8];
        let err = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("cancel did not wake the pending read")
            .unwrap_err();

        assert!(matches!(err, Error::Canceled), "got: {err:?}");
    }

    #[tokio::test]
    async fn close_is_one_shot() {
        let (a, _b) = tokio::io::duplex(64);
        let mut stream = NbStream::new(a);

        stream.close().await.unwrap();
        stream.close().await.unwrap();

        assert!(matches!(stream.write(b"x"), Err(Error::Closed)));
    }
}
