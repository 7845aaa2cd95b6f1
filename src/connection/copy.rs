use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::PgConnection;
use crate::error::Error;
use crate::io::{pool, Decode};
use crate::message::{CommandComplete, CopyDone, CopyFail, CopyResponse, MessageFormat, Query};
use crate::net::Deadline;

// Stream COPY payloads in chunks matching the rest of the I/O stack.
const COPY_CHUNK: usize = 8192;

// While streaming data *to* the server we periodically poll the read side
// without blocking: the server reports a failure (bad data, constraint,
// disk full) as an early ErrorResponse, and noticing it promptly avoids
// pushing megabytes into a doomed transfer.
const ERROR_POLL_INTERVAL: usize = 16;

impl PgConnection {
    /// Execute a `COPY ... TO STDOUT` statement, writing the data stream
    /// to `sink`. Returns the number of rows copied.
    pub async fn copy_to<W>(&mut self, sink: &mut W, sql: &str) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.ensure_usable()?;
        self.wait_until_ready().await?;

        self.stream.write(Query(sql))?;
        self.stream.flush().await.map_err(|e| self.fuse(e))?;
        self.pending_ready_for_query_count += 1;

        // expect CopyOutResponse; anything else (including a server error)
        // aborts after resync
        if let Err(err) = self.expect_copy_response(MessageFormat::CopyOutResponse).await {
            return Err(self.bail_copy(err).await);
        }

        loop {
            let message = match self.stream.recv().await {
                Ok(message) => message,
                Err(err) => return Err(self.bail_copy(err).await),
            };

            match message.format {
                MessageFormat::CopyData => {
                    sink.write_all(&message.contents).await?;
                }

                MessageFormat::CopyDone => break,

                format => {
                    return Err(self.fuse(err_protocol!(
                        "unexpected message during COPY OUT: {format:?}"
                    )));
                }
            }
        }

        sink.flush().await?;

        self.finish_copy().await
    }

    /// Execute a `COPY ... FROM STDIN` statement, streaming `source` to
    /// the server. On end-of-stream the copy completes; if `source` fails,
    /// the copy is aborted with `CopyFail` and the read error is returned.
    ///
    /// Returns the number of rows copied.
    pub async fn copy_from<R>(&mut self, source: &mut R, sql: &str) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_usable()?;
        self.wait_until_ready().await?;

        self.stream.write(Query(sql))?;
        self.stream.flush().await.map_err(|e| self.fuse(e))?;
        self.pending_ready_for_query_count += 1;

        if let Err(err) = self.expect_copy_response(MessageFormat::CopyInResponse).await {
            return Err(self.bail_copy(err).await);
        }

        let mut buf = pool::get(COPY_CHUNK);
        let mut chunks_sent = 0_usize;
        let mut source_err: Option<std::io::Error> = None;

        loop {
            if chunks_sent % ERROR_POLL_INTERVAL == 0 {
                if let Some(early) = self.poll_copy_failure().await? {
                    // the server already failed the copy; stop sending and
                    // surface its error after resync
                    return Err(self.bail_copy(early).await);
                }
            }

            match source.read(&mut buf[..]).await {
                Ok(0) => break,

                Ok(n) => {
                    if let Err(err) = self.stream.send_unbuffered_copy_data(&buf[..n]).await {
                        return Err(self.fuse(err));
                    }

                    chunks_sent += 1;
                }

                Err(err) => {
                    source_err = Some(err);
                    break;
                }
            }
        }

        let terminator = match &source_err {
            None => self.stream.write(CopyDone),
            Some(err) => self.stream.write(CopyFail {
                message: &err.to_string(),
            }),
        };

        if let Err(err) = terminator {
            return Err(self.fuse(err));
        }

        if let Err(err) = self.stream.flush().await {
            return Err(self.fuse(err));
        }

        let result = self.finish_copy().await;

        match source_err {
            // the reader failure takes precedence over the server's
            // complaint about the aborted copy
            Some(err) => Err(Error::Io(err)),
            None => result,
        }
    }

    async fn expect_copy_response(&mut self, format: MessageFormat) -> Result<(), Error> {
        let _: CopyResponse = self.stream.recv_expect(format).await?;

        Ok(())
    }

    // Check for an early ErrorResponse without blocking. `Ok(None)` means
    // the server has said nothing so far.
    async fn poll_copy_failure(&mut self) -> Result<Option<Error>, Error> {
        self.stream.set_read_deadline(Deadline::Nonblocking);

        let result = self.stream.recv().await;

        self.stream.set_read_deadline(Deadline::None);

        match result {
            // a complete message arrived; during COPY IN only an error (or
            // something protocol-fatal) can arrive this early
            Ok(message) => Err(self.fuse(err_protocol!(
                "unexpected message during COPY IN: {:?}",
                message.format
            ))),

            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),

            Err(err @ Error::Database(_)) => Ok(Some(err)),

            Err(err) => Err(self.fuse(err)),
        }
    }

    // After the data phase: CommandComplete carries the row count, then
    // ReadyForQuery closes the operation.
    async fn finish_copy(&mut self) -> Result<u64, Error> {
        let mut rows_affected = 0;

        loop {
            let message = match self.stream.recv().await {
                Ok(message) => message,
                Err(err) => return Err(self.bail_copy(err).await),
            };

            match message.format {
                MessageFormat::CommandComplete => {
                    rows_affected = CommandComplete::decode(message.contents)?.rows_affected();
                }

                MessageFormat::ReadyForQuery => {
                    self.handle_ready_for_query(message.contents)?;
                    return Ok(rows_affected);
                }

                format => {
                    return Err(self.fuse(err_protocol!(
                        "unexpected message completing COPY: {format:?}"
                    )));
                }
            }
        }
    }

    // A server error ended the copy; resynchronize and hand the original
    // error back. Transport errors pass through fused.
    async fn bail_copy(&mut self, err: Error) -> Error {
        if matches!(err, Error::Database(_)) {
            if let Err(resync_err) = self.resync_to_ready().await {
                return resync_err;
            }

            return err;
        }

        self.fuse(err)
    }
}
